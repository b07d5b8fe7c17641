//! duel-core
//!
//! Pure relay logic:
//! - session keys and per-session metadata
//! - the session directory and engine port allocation
//! - the turn-phase orchestrator (phases, action queues, questions)

pub mod session;
pub mod directory;
pub mod ports;
pub mod error;
pub mod phase;
pub mod action;
pub mod question;
pub mod duel;

pub use session::{Ruleset, SessionInfo, SessionKey};
pub use directory::{Directory, DirectorySnapshot};
pub use ports::PortAllocator;
pub use error::{ActionError, DirectoryError, DuelError};
pub use phase::{Phase, SkipFlags};
pub use action::{ActionKind, ActionQueue, PhaseQueues, Player, QueuedAction};
pub use question::{
    question_channel,
    Answer,
    BattleOptions,
    CardRef,
    MainPhaseOptions,
    PendingQuestion,
    Question,
    QuestionDesk,
};
pub use duel::{Duel, DuelEngine, DuelOutcome, DuelParams, TurnState};
