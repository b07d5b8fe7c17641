//! Lobby channel: directory updates for clients browsing open sessions.
//!
//! WebSocket, JSON text frames. `{"action":"join"}` subscribes the socket
//! and sends the current directory at once; `{"action":"leave"}`
//! unsubscribes. Lobby sockets never reach an engine.

use std::future::pending;
use std::sync::Arc;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use duel_core::DirectorySnapshot;
use duel_protocol::{encode_directory, parse_command, LobbyCommand};

use crate::error::RelayError;
use crate::hub::SessionHub;
use crate::types::ConnectionId;

type LobbySink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Serve one lobby socket until it closes.
pub async fn run_subscriber(
    conn: ConnectionId,
    stream: TcpStream,
    hub: Arc<SessionHub>,
) -> Result<(), RelayError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();
    let mut updates: Option<broadcast::Receiver<Arc<DirectorySnapshot>>> = None;

    loop {
        tokio::select! {
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => match parse_command(&text) {
                    Ok(LobbyCommand::Join) => {
                        if updates.is_none() {
                            // Subscribe before reading, so nothing falls in between.
                            updates = Some(hub.subscribe());
                            send_directory(&mut sink, &*hub.snapshot().await).await?;
                            debug!(%conn, "lobby subscribed");
                        }
                    }
                    Ok(LobbyCommand::Leave) => {
                        if updates.take().is_some() {
                            debug!(%conn, "lobby unsubscribed");
                        }
                    }
                    Err(e) => debug!(%conn, error = %e, frame = %text, "ignoring lobby frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            update = next_update(&mut updates) => match update {
                Ok(snapshot) => send_directory(&mut sink, &*snapshot).await?,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%conn, skipped, "lobby subscriber lagged, resending directory");
                    send_directory(&mut sink, &*hub.snapshot().await).await?;
                }
                Err(RecvError::Closed) => updates = None,
            },
        }
    }

    let _ = sink.close().await;
    Ok(())
}

async fn send_directory(sink: &mut LobbySink, snapshot: &DirectorySnapshot) -> Result<(), RelayError> {
    let json = encode_directory(snapshot)?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}

async fn next_update(
    updates: &mut Option<broadcast::Receiver<Arc<DirectorySnapshot>>>,
) -> Result<Arc<DirectorySnapshot>, RecvError> {
    match updates {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}
