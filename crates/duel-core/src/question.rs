//! Questions to the turn player and their answers.
//!
//! The orchestrator owns a [`QuestionDesk`]; whoever presents questions to
//! the player (a socket, a bot, a test) owns the matching receiver of
//! [`PendingQuestion`]s. Each question carries its own oneshot reply, so
//! an answer can be delivered at most once, and the desk refuses to open a
//! second question while one is still in flight.

use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::action::{ActionKind, Player};
use crate::error::DuelError;
use crate::phase::Phase;

/// Card identifier as reported by the rules engine.
pub type CardRef = u32;

/// Options offered during Main1 / Main2.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MainPhaseOptions {
    pub normal_summon: Vec<CardRef>,
    pub special_summon: Vec<CardRef>,
    pub tribute_summon: Vec<CardRef>,
    pub to_defense: Vec<CardRef>,
    pub set_monster: Vec<CardRef>,
    pub activate_spell_trap: Vec<CardRef>,
    pub set_spell_trap: Vec<CardRef>,
    pub activate_grave: Vec<CardRef>,
    pub activate_banished: Vec<CardRef>,
    pub battle_phase_available: bool,
    pub end_phase_available: bool,
    pub pendulum_summon_available: bool,
}

/// Options offered during Battle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BattleOptions {
    pub attack: Vec<CardRef>,
    pub activate: Vec<CardRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Question {
    MainPhase {
        player: Player,
        phase: Phase,
        options: MainPhaseOptions,
    },
    BattlePhase {
        player: Player,
        options: BattleOptions,
    },
}

impl Question {
    pub fn player(&self) -> Player {
        match self {
            Question::MainPhase { player, .. } | Question::BattlePhase { player, .. } => *player,
        }
    }
}

/// Player decision for one question round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    /// Leave Main1 for Battle.
    EnterBattle,
    /// Leave Battle for Main2.
    EnterMain2,
    /// Go straight to End, skipping whatever lies between.
    EnterEnd,
    /// Perform an action and stay in the phase.
    Act(ActionKind),
}

/// A question waiting for the player.
#[derive(Debug)]
pub struct PendingQuestion {
    pub id: u64,
    pub question: Question,
    reply: oneshot::Sender<Answer>,
}

impl PendingQuestion {
    /// Deliver the answer. Returns `false` if the duel stopped waiting.
    pub fn answer(self, answer: Answer) -> bool {
        self.reply.send(answer).is_ok()
    }
}

/// Orchestrator side of the question channel.
#[derive(Debug)]
pub struct QuestionDesk {
    next_id: u64,
    in_flight: Option<u64>,
    outbound: mpsc::UnboundedSender<PendingQuestion>,
}

/// Create a desk and the receiver on which its questions arrive.
pub fn question_channel() -> (QuestionDesk, mpsc::UnboundedReceiver<PendingQuestion>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let desk = QuestionDesk {
        next_id: 1,
        in_flight: None,
        outbound: tx,
    };
    (desk, rx)
}

impl QuestionDesk {
    /// Id of the unanswered question, if any.
    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    /// Ask one question and wait for its answer.
    ///
    /// Fails with [`DuelError::QuestionOutstanding`] if an earlier `ask`
    /// was abandoned before its answer arrived, and with
    /// [`DuelError::Aborted`] if the player side is gone.
    pub async fn ask(&mut self, question: Question) -> Result<Answer, DuelError> {
        if let Some(id) = self.in_flight {
            return Err(DuelError::QuestionOutstanding(id));
        }

        let id = self.next_id;
        self.next_id += 1;
        trace!(id, player = question.player(), "asking");

        let (reply, answer_rx) = oneshot::channel();
        self.outbound
            .send(PendingQuestion {
                id,
                question,
                reply,
            })
            .map_err(|_| DuelError::Aborted)?;

        self.in_flight = Some(id);
        let answer = answer_rx.await.map_err(|_| DuelError::Aborted);
        self.in_flight = None;
        answer
    }

    /// Forget an abandoned question so the next `ask` can proceed.
    pub fn withdraw(&mut self) -> Option<u64> {
        self.in_flight.take()
    }
}
