//! Error types for the core relay logic.
//!
//! Directory operations fail only for well-defined reasons (unknown key,
//! port collision); turn-phase errors carry the phase they aborted.

use thiserror::Error;

use crate::phase::Phase;
use crate::session::SessionKey;

/// Errors returned by [`crate::Directory`] mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    /// The key already names a live session.
    #[error("session {0} already exists")]
    SessionExists(SessionKey),

    /// The key is neither live nor reserved.
    #[error("unknown session {0}")]
    UnknownSession(SessionKey),

    /// The port is held by another session or reservation.
    #[error("port {0} is already assigned")]
    PortInUse(u16),

    /// The key already has a spawn in flight.
    #[error("session {0} is already reserved")]
    AlreadyReserved(SessionKey),
}

/// Failure of a single queued action.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("action {action} failed: {reason}")]
pub struct ActionError {
    pub action: String,
    pub reason: String,
}

impl ActionError {
    pub fn new(action: impl Into<String>, reason: impl Into<String>) -> Self {
        ActionError {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the turn-phase orchestrator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DuelError {
    /// A queued action failed; the rest of that phase's queue was dropped.
    #[error("{phase:?} phase aborted: {source}")]
    Action {
        phase: Phase,
        #[source]
        source: ActionError,
    },

    /// An opening action (life points, first player) failed.
    #[error("duel setup failed: {0}")]
    Setup(#[source] ActionError),

    /// A question was asked while another was still unanswered.
    #[error("question {0} is still awaiting an answer")]
    QuestionOutstanding(u64),

    /// The player side went away (answer channel closed).
    #[error("duel aborted")]
    Aborted,
}
