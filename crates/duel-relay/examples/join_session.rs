//! Join (or host) a session through the relay and print what comes back.
//!
//! ```text
//! DUEL_RELAY_ADDR=127.0.0.1:8911 cargo run -p duel-relay --example join_session -- 0mygame alice
//! ```

use std::env;
use std::time::Duration;

use duel_protocol::{decode_join_refusal, encode_ctos, CtosMessage, FrameDecoder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let addr = env::var("DUEL_RELAY_ADDR").unwrap_or_else(|_| "127.0.0.1:8911".to_string());
    let mut args = env::args().skip(1);
    let key = args.next().unwrap_or_else(|| "0demo".to_string());
    let name = args.next().unwrap_or_else(|| "duelist".to_string());

    println!("Connecting to {}...", addr);
    let mut stream = TcpStream::connect(&addr).await?;
    println!("Connected. Joining {:?} as {:?}.", key, name);

    let mut out = Vec::with_capacity(128);
    encode_ctos(&CtosMessage::PlayerInfo { name }, &mut out)
        .map_err(|e| anyhow::anyhow!("encode error: {}", e))?;
    encode_ctos(
        &CtosMessage::JoinGame {
            version: 0x1338,
            game_id: 0,
            password: key,
        },
        &mut out,
    )
    .map_err(|e| anyhow::anyhow!("encode error: {}", e))?;
    encode_ctos(&CtosMessage::ToDuelist, &mut out)
        .map_err(|e| anyhow::anyhow!("encode error: {}", e))?;
    stream.write_all(&out).await?;

    // Print frames until the engine goes quiet for a while.
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match timeout(Duration::from_secs(20), stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                println!("Relay closed the connection.");
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                eprintln!("Read error: {}", e);
                break;
            }
            Err(_) => {
                println!("No traffic for 20s, exiting.");
                break;
            }
        };

        for frame in decoder.push(&buf[..n]) {
            match decode_join_refusal(&frame) {
                Ok(code) => println!("<< join refused (code {})", code),
                Err(_) => println!(
                    "<< STOC {:#04x} ({} payload bytes)",
                    frame.msg_type,
                    frame.payload.len()
                ),
            }
        }
    }

    Ok(())
}
