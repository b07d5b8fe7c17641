//! Listeners and top-level server wiring.
//!
//! This module:
//! - Binds the TCP, WebSocket and lobby listeners.
//! - Accepts connections, enforcing `max_clients` per listener (excess
//!   connections are dropped at accept).
//! - Assigns each connection a `ConnectionId` and spawns its task:
//!   the relay for TCP / WebSocket, the lobby subscriber for the lobby.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::hub::SessionHub;
use crate::lobby;
use crate::relay::{self, RelayContext};
use crate::supervisor::Supervisor;
use crate::transport::{tcp, ws};
use crate::types::{next_connection_id, ConnectionId};

pub struct Server {
    tcp: TcpListener,
    ws: TcpListener,
    lobby: TcpListener,
    max_clients: usize,
    ctx: RelayContext,
}

impl Server {
    /// Bind all three listeners.
    pub async fn bind(config: &Config) -> anyhow::Result<Self> {
        Self::bind_with(config, Supervisor::new(&config.engine)).await
    }

    /// Bind with a custom engine supervisor (e.g. a different console probe).
    pub async fn bind_with(config: &Config, supervisor: Supervisor) -> anyhow::Result<Self> {
        let tcp = TcpListener::bind(config.tcp_addr_string()).await?;
        let ws = TcpListener::bind(config.ws_addr_string()).await?;
        let lobby = TcpListener::bind(config.lobby_addr_string()).await?;

        let ctx = RelayContext {
            hub: Arc::new(SessionHub::new(config.port_allocator())),
            supervisor: Arc::new(supervisor),
            max_pending_bytes: config.relay.max_pending_bytes,
        };

        Ok(Server {
            tcp,
            ws,
            lobby,
            max_clients: config.server.max_clients,
            ctx,
        })
    }

    pub fn tcp_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn ws_addr(&self) -> io::Result<SocketAddr> {
        self.ws.local_addr()
    }

    pub fn lobby_addr(&self) -> io::Result<SocketAddr> {
        self.lobby.local_addr()
    }

    pub fn hub(&self) -> Arc<SessionHub> {
        self.ctx.hub.clone()
    }

    /// Accept connections. Accept errors are logged and retried, so this
    /// only returns if the startup log cannot read a listener address.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            tcp = %self.tcp_addr()?,
            ws = %self.ws_addr()?,
            lobby = %self.lobby_addr()?,
            max_clients = self.max_clients,
            "duel relay listening"
        );

        let Server {
            tcp,
            ws,
            lobby,
            max_clients,
            ctx,
        } = self;

        tokio::join!(
            accept_loop(tcp, Listener::Tcp, max_clients, ctx.clone()),
            accept_loop(ws, Listener::WebSocket, max_clients, ctx.clone()),
            accept_loop(lobby, Listener::Lobby, max_clients, ctx),
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Listener {
    Tcp,
    WebSocket,
    Lobby,
}

/// Decrements the listener's client count when the connection task ends.
struct Slot(Arc<AtomicUsize>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Pause before the next `accept` after it failed.
///
/// A connection that died in the backlog is retried at once; anything
/// else (typically out of file descriptors) gets time to recover.
fn accept_backoff(err: &io::Error) -> Duration {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted => Duration::ZERO,
        _ => ACCEPT_BACKOFF,
    }
}

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

async fn accept_loop(listener: TcpListener, kind: Listener, max_clients: usize, ctx: RelayContext) {
    let live = Arc::new(AtomicUsize::new(0));

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                let pause = accept_backoff(&e);
                warn!(?kind, error = %e, ?pause, "accept failed");
                if !pause.is_zero() {
                    sleep(pause).await;
                }
                continue;
            }
        };

        if live.load(Ordering::SeqCst) >= max_clients {
            warn!(?kind, %peer, max_clients, "rejecting connection: max_clients reached");
            continue;
        }
        live.fetch_add(1, Ordering::SeqCst);
        let slot = Slot(live.clone());

        let conn = next_connection_id();
        info!(%conn, ?kind, %peer, "accepted connection");

        let ctx = ctx.clone();
        tokio::spawn(async move {
            let _slot = slot;
            serve(conn, kind, stream, ctx).await;
            debug!(%conn, "connection task finished");
        });
    }
}

async fn serve(conn: ConnectionId, kind: Listener, stream: TcpStream, ctx: RelayContext) {
    match kind {
        Listener::Tcp => relay::run_connection(ctx, tcp::split(conn, stream)).await,
        Listener::WebSocket => match ws::accept(conn, stream).await {
            Ok(io) => relay::run_connection(ctx, io).await,
            Err(e) => warn!(%conn, error = %e, "websocket handshake failed"),
        },
        Listener::Lobby => {
            if let Err(e) = lobby::run_subscriber(conn, stream, ctx.hub).await {
                debug!(%conn, error = %e, "lobby connection error");
            }
        }
    }
}
