//! WebSocket transport.
//!
//! Binary messages carry the engine byte stream; text messages are passed
//! on as their UTF-8 bytes. Outbound bytes go out as binary messages.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::RelayError;
use crate::types::{ClientIo, ConnectionId, Transport, INBOUND_CAPACITY};

/// Complete the WebSocket handshake on an accepted stream and wrap it.
pub async fn accept(conn: ConnectionId, stream: TcpStream) -> Result<ClientIo, RelayError> {
    let peer = stream.peer_addr().ok();
    let _ = stream.set_nodelay(true);
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    let (in_tx, in_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();

    let reader = tokio::spawn(async move {
        while let Some(msg) = source.next().await {
            let bytes = match msg {
                Ok(Message::Binary(data)) => Bytes::from(data),
                Ok(Message::Text(text)) => Bytes::from(text),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(%conn, error = %e, "websocket read failed");
                    break;
                }
            };
            if in_tx.send(bytes).await.is_err() {
                break;
            }
        }
        debug!(%conn, "websocket client closed");
    });

    tokio::spawn(async move {
        while let Some(bytes) = out_rx.recv().await {
            if let Err(e) = sink.send(Message::Binary(bytes.to_vec())).await {
                debug!(%conn, error = %e, "websocket write failed");
                return;
            }
        }
        let _ = sink.close().await;
    });

    Ok(ClientIo {
        conn,
        transport: Transport::WebSocket,
        peer,
        inbound: in_rx,
        outbound: out_tx,
        reader,
    })
}
