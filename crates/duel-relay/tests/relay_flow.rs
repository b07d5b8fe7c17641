// crates/duel-relay/tests/relay_flow.rs
//
// End-to-end: a `/bin/sh` stand-in prints the ready marker, and the test
// itself listens on the engine port to play the engine's side.
#![cfg(unix)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;

use duel_core::SessionKey;
use duel_protocol::{decode_directory, encode_ctos, CtosMessage};
use duel_relay::config::{Config, EngineConfig, PortRange};
use duel_relay::hub::SessionHub;
use duel_relay::Server;

const WAIT: Duration = Duration::from_secs(10);

struct Relay {
    tcp: SocketAddr,
    ws: SocketAddr,
    lobby: SocketAddr,
    hub: Arc<SessionHub>,
}

/// Config for a relay whose single engine port is `engine_port`.
fn relay_config(engine_port: u16) -> Config {
    let mut config = Config::default();
    config.server.bind_addr = "127.0.0.1".to_string();
    config.server.tcp_port = 0;
    config.server.ws_port = 0;
    config.server.lobby_port = 0;
    config.ports = PortRange {
        min: engine_port,
        max: engine_port + 1,
    };
    config.engine = EngineConfig {
        program: PathBuf::from("/bin/sh"),
        args: vec![
            "-c".to_string(),
            "echo Start; exec sleep 30".to_string(),
            "engine".to_string(),
        ],
        working_dir: std::env::temp_dir(),
        ready_timeout_ms: 5_000,
    };
    config.validate().unwrap();
    config
}

async fn start_relay(engine_port: u16) -> Relay {
    start_with(relay_config(engine_port)).await
}

async fn start_with(config: Config) -> Relay {
    let server = Server::bind(&config).await.unwrap();
    let relay = Relay {
        tcp: server.tcp_addr().unwrap(),
        ws: server.ws_addr().unwrap(),
        lobby: server.lobby_addr().unwrap(),
        hub: server.hub(),
    };
    tokio::spawn(server.run());
    relay
}

async fn engine_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn ctos(msgs: &[CtosMessage]) -> Vec<u8> {
    let mut out = Vec::new();
    for msg in msgs {
        encode_ctos(msg, &mut out).unwrap();
    }
    out
}

fn hello(name: &str, key: &str) -> Vec<u8> {
    ctos(&[
        CtosMessage::PlayerInfo { name: name.into() },
        CtosMessage::JoinGame {
            version: 0x1338,
            game_id: 0,
            password: key.into(),
        },
    ])
}

async fn accept_engine_side(listener: &TcpListener, expect: &[u8]) -> TcpStream {
    let (mut sock, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut got = vec![0u8; expect.len()];
    timeout(WAIT, sock.read_exact(&mut got)).await.unwrap().unwrap();
    assert_eq!(got, expect);
    sock
}

type Lobby = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

async fn lobby_join(addr: SocketAddr) -> Lobby {
    let (mut lobby, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
        .await
        .unwrap();
    lobby
        .send(Message::Text(r#"{"action":"join"}"#.to_string()))
        .await
        .unwrap();
    lobby
}

async fn next_text(lobby: &mut Lobby) -> String {
    loop {
        match timeout(WAIT, lobby.next()).await.unwrap() {
            Some(Ok(Message::Text(text))) => return text,
            Some(Ok(_)) => continue,
            other => panic!("lobby closed: {other:?}"),
        }
    }
}

async fn wait_for_players(hub: &SessionHub, key: &str, expected: &[&str]) {
    let key = SessionKey::new(key);
    for _ in 0..200 {
        let snapshot = hub.snapshot().await;
        let players: Vec<String> = snapshot
            .get(&key)
            .map(|s| s.players.clone())
            .unwrap_or_default();
        if players == expected {
            return;
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("players of {key} never became {expected:?}");
}

#[tokio::test]
async fn tcp_host_is_relayed_and_torn_down() {
    let (engine, port) = engine_port().await;
    let relay = start_relay(port).await;

    let mut lobby = lobby_join(relay.lobby).await;
    assert_eq!(next_text(&mut lobby).await, "{}");

    let mut client = TcpStream::connect(relay.tcp).await.unwrap();
    let greeting = hello("alice", "0duel");
    client.write_all(&greeting).await.unwrap();

    // Everything sent before the engine was ready arrives first, intact.
    let mut engine_side = accept_engine_side(&engine, &greeting).await;

    let directory = decode_directory(&next_text(&mut lobby).await).unwrap();
    let session = &directory["0duel"];
    assert_eq!(session.port, port);
    assert_eq!(session.players, vec!["alice".to_string()]);
    assert!(!session.started);

    // Engine → client, verbatim.
    engine_side.write_all(b"\x03\x00\x13\x01\x02").await.unwrap();
    let mut back = [0u8; 5];
    timeout(WAIT, client.read_exact(&mut back)).await.unwrap().unwrap();
    assert_eq!(&back, b"\x03\x00\x13\x01\x02");

    // Client → engine, verbatim, and the start is reflected in the lobby.
    let start = ctos(&[CtosMessage::Start]);
    client.write_all(&start).await.unwrap();
    let mut got = vec![0u8; start.len()];
    timeout(WAIT, engine_side.read_exact(&mut got)).await.unwrap().unwrap();
    assert_eq!(got, start);

    let directory = decode_directory(&next_text(&mut lobby).await).unwrap();
    assert!(directory["0duel"].started);

    // Host leaves: session gone, one update with the empty directory.
    drop(client);
    assert_eq!(next_text(&mut lobby).await, "{}");
    assert!(relay.hub.snapshot().await.is_empty());

    // The engine side sees the relay hang up.
    let mut rest = Vec::new();
    let closed = timeout(WAIT, engine_side.read_to_end(&mut rest)).await;
    assert!(closed.is_ok(), "relay kept the engine link open");
}

#[tokio::test]
async fn websocket_member_joins_hosted_session() {
    let (engine, port) = engine_port().await;
    let relay = start_relay(port).await;

    let mut host = TcpStream::connect(relay.tcp).await.unwrap();
    let host_hello = hello("alice", "1ws");
    host.write_all(&host_hello).await.unwrap();
    let _host_side = accept_engine_side(&engine, &host_hello).await;
    wait_for_players(&relay.hub, "1ws", &["alice"]).await;

    let (mut member, _) = tokio_tungstenite::connect_async(format!("ws://{}", relay.ws))
        .await
        .unwrap();
    let member_hello = hello("bob", "1ws");
    member
        .send(Message::Binary(member_hello.clone()))
        .await
        .unwrap();

    let mut member_side = accept_engine_side(&engine, &member_hello).await;
    wait_for_players(&relay.hub, "1ws", &["alice", "bob"]).await;

    member_side.write_all(b"duel data").await.unwrap();
    let mut received = Vec::new();
    while received.len() < 9 {
        match timeout(WAIT, member.next()).await.unwrap() {
            Some(Ok(Message::Binary(data))) => received.extend(data),
            Some(Ok(_)) => continue,
            other => panic!("websocket closed early: {other:?}"),
        }
    }
    assert_eq!(received, b"duel data");

    // Moving to spectator removes the name, taking a slot adds it back.
    member
        .send(Message::Binary(ctos(&[CtosMessage::ToObserver])))
        .await
        .unwrap();
    wait_for_players(&relay.hub, "1ws", &["alice"]).await;
    member
        .send(Message::Binary(ctos(&[CtosMessage::ToDuelist])))
        .await
        .unwrap();
    wait_for_players(&relay.hub, "1ws", &["alice", "bob"]).await;

    member.close(None).await.unwrap();
    wait_for_players(&relay.hub, "1ws", &["alice"]).await;
}

#[tokio::test]
async fn exhausted_pool_refuses_second_host() {
    let (engine, port) = engine_port().await;
    let relay = start_relay(port).await;

    let mut first = TcpStream::connect(relay.tcp).await.unwrap();
    let first_hello = hello("alice", "0first");
    first.write_all(&first_hello).await.unwrap();
    let _engine_side = accept_engine_side(&engine, &first_hello).await;

    let mut second = TcpStream::connect(relay.tcp).await.unwrap();
    second.write_all(&hello("bob", "0second")).await.unwrap();

    let mut reply = Vec::new();
    timeout(WAIT, second.read_to_end(&mut reply)).await.unwrap().unwrap();
    // STOC ERROR_MSG, join error, code 0.
    assert_eq!(reply, vec![9, 0, 0x02, 1, 0, 0, 0, 0, 0, 0, 0]);

    let snapshot = relay.hub.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.get(&SessionKey::new("0second")).is_none());
}

#[tokio::test]
async fn unknown_frames_without_session_change_nothing() {
    let (_engine, port) = engine_port().await;
    let relay = start_relay(port).await;

    let mut lobby = lobby_join(relay.lobby).await;
    assert_eq!(next_text(&mut lobby).await, "{}");

    let mut client = TcpStream::connect(relay.tcp).await.unwrap();
    // Opaque frame, then session-scoped frames with no session.
    client.write_all(&[4, 0, 0x01, 9, 9, 9]).await.unwrap();
    client.write_all(&ctos(&[CtosMessage::Start, CtosMessage::ToDuelist])).await.unwrap();
    drop(client);

    sleep(Duration::from_millis(200)).await;
    assert!(relay.hub.snapshot().await.is_empty());
    let quiet = timeout(Duration::from_millis(200), lobby.next()).await;
    assert!(quiet.is_err(), "unexpected lobby traffic: {quiet:?}");
}

#[tokio::test]
async fn oversized_pre_join_buffer_closes_connection() {
    let (_engine, port) = engine_port().await;
    let mut config = relay_config(port);
    config.relay.max_pending_bytes = 16;
    let relay = start_with(config).await;

    let mut client = TcpStream::connect(relay.tcp).await.unwrap();
    // Opaque frames only, so nothing ever attaches.
    let mut junk = Vec::new();
    for _ in 0..8 {
        junk.extend_from_slice(&[4, 0, 0x01, 9, 9, 9]);
    }
    client.write_all(&junk).await.unwrap();

    let mut rest = Vec::new();
    let closed = timeout(WAIT, client.read_to_end(&mut rest)).await;
    assert!(closed.is_ok(), "relay kept an over-full connection open");
    assert!(rest.is_empty());
    assert!(relay.hub.snapshot().await.is_empty());
}

#[tokio::test]
async fn racing_hosts_share_one_engine() {
    let (engine, port) = engine_port().await;
    let relay = start_relay(port).await;

    // Same-length names, so both greetings have the same size.
    let alice = hello("alice", "0race");
    let carol = hello("carol", "0race");
    let (a, c) = tokio::join!(TcpStream::connect(relay.tcp), TcpStream::connect(relay.tcp));
    let (mut a, mut c) = (a.unwrap(), c.unwrap());
    let (sent_a, sent_c) = tokio::join!(a.write_all(&alice), c.write_all(&carol));
    sent_a.unwrap();
    sent_c.unwrap();

    // The pool holds a single port: a second spawn would have been refused.
    let mut greetings = Vec::new();
    let mut engine_sides = Vec::new();
    for _ in 0..2 {
        let (mut sock, _) = timeout(WAIT, engine.accept()).await.unwrap().unwrap();
        let mut got = vec![0u8; alice.len()];
        timeout(WAIT, sock.read_exact(&mut got)).await.unwrap().unwrap();
        greetings.push(got);
        engine_sides.push(sock);
    }
    greetings.sort();
    let mut expected = vec![alice, carol];
    expected.sort();
    assert_eq!(greetings, expected);

    for _ in 0..200 {
        let snapshot = relay.hub.snapshot().await;
        if let Some(session) = snapshot.get(&SessionKey::new("0race")) {
            if session.players.len() == 2 {
                let mut players = session.players.clone();
                players.sort();
                assert_eq!(players, vec!["alice".to_string(), "carol".to_string()]);
                assert_eq!(session.port, port);
                assert_eq!(snapshot.len(), 1);
                return;
            }
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("both racers never joined");
}

#[tokio::test]
async fn end_marker_closes_session() {
    let (engine, port) = engine_port().await;
    let flag = tempfile::tempdir().unwrap();
    let flag_path = flag.path().join("duel-over");

    let mut config = relay_config(port);
    config.engine.args = vec![
        "-c".to_string(),
        format!(
            "echo Start; while [ ! -e '{}' ]; do sleep 0.05; done; echo End; exec sleep 30",
            flag_path.display()
        ),
        "engine".to_string(),
    ];
    let relay = start_with(config).await;

    let mut lobby = lobby_join(relay.lobby).await;
    assert_eq!(next_text(&mut lobby).await, "{}");

    let mut client = TcpStream::connect(relay.tcp).await.unwrap();
    let greeting = hello("alice", "A");
    client.write_all(&greeting).await.unwrap();
    let _engine_side = accept_engine_side(&engine, &greeting).await;

    let directory = decode_directory(&next_text(&mut lobby).await).unwrap();
    assert_eq!(directory["A"].players, vec!["alice".to_string()]);

    // The engine prints its end marker.
    std::fs::write(&flag_path, b"").unwrap();

    assert_eq!(next_text(&mut lobby).await, "{}");
    assert!(relay.hub.snapshot().await.is_empty());

    let mut rest = Vec::new();
    let closed = timeout(WAIT, client.read_to_end(&mut rest)).await;
    assert!(closed.is_ok(), "client stayed connected after the duel ended");
}
