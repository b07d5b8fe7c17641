//! Error types for the relay.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use duel_core::DirectoryError;
use thiserror::Error;

/// Failures of [`crate::hub::SessionHub`] operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// Every engine port in the pool is taken.
    #[error("no free engine port in [{min}, {max})")]
    PortsExhausted { min: u16, max: u16 },

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Failures of [`crate::supervisor::Supervisor::spawn`].
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The engine binary could not be started at all.
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The engine quit before printing its ready marker.
    #[error("engine exited before becoming ready (code {0:?})")]
    ExitedBeforeReady(Option<i32>),

    /// No ready marker within the configured time; the engine was killed.
    #[error("engine not ready after {0:?}")]
    ReadyTimeout(Duration),
}

/// Failures while loading or validating [`crate::config::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// An environment override did not parse.
    #[error("invalid value {value:?} for {key}")]
    Env { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Transport-level failures of a single connection.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("lobby update could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}
