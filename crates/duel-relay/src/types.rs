//! Shared types for the relay.
//!
//! This module defines:
//! - `ConnectionId`: a lightweight handle for connected clients
//! - channel aliases between transport tasks and the relay
//! - `ClientIo`: what a transport hands to the relay for one client

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Identifier for a connected client.
///
/// Unique over the lifetime of the process, across all listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_connection_id() -> ConnectionId {
    ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Bytes read from a client, in arrival order. Closed on disconnect.
pub type InboundTx = mpsc::Sender<Bytes>;
pub type InboundRx = mpsc::Receiver<Bytes>;

/// Bytes to write to a client. Dropping the sender closes the socket once
/// everything queued has been written.
pub type OutboundTx = mpsc::UnboundedSender<Bytes>;
pub type OutboundRx = mpsc::UnboundedReceiver<Bytes>;

/// Reader-side buffering between a socket and the relay.
pub const INBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    WebSocket,
}

/// One client connection as seen by the relay.
#[derive(Debug)]
pub struct ClientIo {
    pub conn: ConnectionId,
    pub transport: Transport,
    pub peer: Option<SocketAddr>,
    pub inbound: InboundRx,
    pub outbound: OutboundTx,
    /// Socket reader task; aborted at teardown.
    pub reader: JoinHandle<()>,
}
