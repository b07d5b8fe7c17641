//! Tagged actions and the per-phase work lists that hold them.
//!
//! Each phase owns an ordered queue. The orchestrator drains a queue front
//! to back; a failing action stops the drain and the remaining entries are
//! discarded (see [`crate::duel::Duel`]).

use std::collections::VecDeque;
use std::fmt;

use crate::phase::Phase;

/// Player seat (0 or 1).
pub type Player = u8;

/// A unit of work for the duel.
///
/// `SkipPhase` is applied by the orchestrator itself; every other kind is
/// handed to the rules engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// Set both players' starting life points.
    SetLifePoints(u32),

    /// Choose who takes the first turn.
    SetTurnPlayer(Player),

    /// Draw `count` cards for `player`.
    Draw { player: Player, count: u32 },

    /// Mark a phase of the current turn as skipped.
    SkipPhase(Phase),

    /// Engine-defined effect or player action, identified by name.
    Effect(String),
}

impl ActionKind {
    /// Short tag used in logs and errors.
    pub fn tag(&self) -> &str {
        match self {
            ActionKind::SetLifePoints(_) => "set-life-points",
            ActionKind::SetTurnPlayer(_) => "set-turn-player",
            ActionKind::Draw { .. } => "draw",
            ActionKind::SkipPhase(_) => "skip-phase",
            ActionKind::Effect(name) => name,
        }
    }
}

/// Callback run after an action completes successfully.
pub type ActionCallback = Box<dyn FnOnce(&ActionKind) + Send>;

/// An action waiting in a phase queue, with an optional result callback.
pub struct QueuedAction {
    pub kind: ActionKind,
    pub on_done: Option<ActionCallback>,
}

impl QueuedAction {
    pub fn new(kind: ActionKind) -> Self {
        QueuedAction {
            kind,
            on_done: None,
        }
    }

    pub fn with_callback(kind: ActionKind, on_done: impl FnOnce(&ActionKind) + Send + 'static) -> Self {
        QueuedAction {
            kind,
            on_done: Some(Box::new(on_done)),
        }
    }
}

impl fmt::Debug for QueuedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedAction")
            .field("kind", &self.kind)
            .field("has_callback", &self.on_done.is_some())
            .finish()
    }
}

/// FIFO of pending actions for one phase.
#[derive(Debug, Default)]
pub struct ActionQueue {
    items: VecDeque<QueuedAction>,
}

impl ActionQueue {
    pub fn push(&mut self, action: QueuedAction) {
        self.items.push_back(action);
    }

    pub fn pop(&mut self) -> Option<QueuedAction> {
        self.items.pop_front()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One queue per phase, scoped to a single duel.
#[derive(Debug, Default)]
pub struct PhaseQueues {
    queues: [ActionQueue; 6],
}

impl PhaseQueues {
    pub fn get(&self, phase: Phase) -> &ActionQueue {
        &self.queues[phase.index()]
    }

    pub fn get_mut(&mut self, phase: Phase) -> &mut ActionQueue {
        &mut self.queues[phase.index()]
    }

    pub fn push(&mut self, phase: Phase, action: QueuedAction) {
        self.get_mut(phase).push(action);
    }
}
