//! duel-relay
//!
//! Async relay between duel clients and per-session engine processes.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;
pub mod hub;
pub mod supervisor;
pub mod transport;
pub mod server;

// internal modules, not re-exported
mod lobby;
mod relay;

pub use config::Config;
pub use error::{ConfigError, HubError, RelayError, SpawnError};
pub use server::Server;
