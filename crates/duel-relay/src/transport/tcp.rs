use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{ClientIo, ConnectionId, OutboundRx, Transport, INBOUND_CAPACITY};

/// Wrap an accepted TCP stream.
pub fn split(conn: ConnectionId, stream: TcpStream) -> ClientIo {
    let peer = stream.peer_addr().ok();
    let _ = stream.set_nodelay(true);
    let (mut read_half, write_half) = stream.into_split();

    let (in_tx, in_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let reader = tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(4096);
        loop {
            match read_half.read_buf(&mut buf).await {
                Ok(0) => {
                    debug!(%conn, "client closed");
                    break;
                }
                Ok(_) => {
                    if in_tx.send(buf.split().freeze()).await.is_err() {
                        break;
                    }
                    buf.reserve(4096);
                }
                Err(e) => {
                    debug!(%conn, error = %e, "client read failed");
                    break;
                }
            }
        }
    });

    tokio::spawn(write_loop(conn, write_half, out_rx));

    ClientIo {
        conn,
        transport: Transport::Tcp,
        peer,
        inbound: in_rx,
        outbound: out_tx,
        reader,
    }
}

async fn write_loop(
    conn: ConnectionId,
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut out_rx: OutboundRx,
) {
    while let Some(bytes) = out_rx.recv().await {
        if let Err(e) = write_half.write_all(&bytes).await {
            debug!(%conn, error = %e, "client write failed");
            return;
        }
    }
    let _ = write_half.shutdown().await;
}
