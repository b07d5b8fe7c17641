//! Turn-phase orchestrator.
//!
//! Drives one duel through Draw → Standby → Main1 → Battle → Main2 → End
//! against an external rules engine:
//! - each phase first drains its own action queue, in order;
//! - a skipped phase still drains its queue, then is bypassed without
//!   entering it or asking the player anything;
//! - Main1, Battle and Main2 loop over question rounds until the player
//!   answers with a phase change;
//! - End hands the turn over via [`DuelEngine::next_turn`].
//!
//! A failing action stops its phase: the rest of that phase's queue is
//! discarded and the error is returned to the caller of [`Duel::run_turn`]
//! / [`Duel::run`].

use std::future::Future;

use tracing::{debug, trace, warn};

use crate::action::{ActionKind, ActionQueue, PhaseQueues, Player, QueuedAction};
use crate::error::{ActionError, DuelError};
use crate::phase::{Phase, SkipFlags};
use crate::question::{Answer, BattleOptions, MainPhaseOptions, Question, QuestionDesk};

/// Engine-side turn bookkeeping read by the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnState {
    pub turn_player: Player,

    /// Turns completed so far; `0` during the very first turn.
    pub turn_count: u32,

    /// Engine-controlled skip of the whole Draw phase.
    pub skip_draw: bool,

    /// Engine-controlled suppression of the normal draw only.
    pub draw_suppressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuelOutcome {
    Winner(Player),
    Tie,
}

/// Port to the external rules engine.
pub trait DuelEngine {
    fn turn_state(&self) -> TurnState;

    /// Called when a phase is entered (not for skipped phases).
    fn enter_phase(&mut self, phase: Phase);

    /// Execute an engine action. Completes once the engine has resolved it,
    /// including any effects it triggers.
    fn perform(&mut self, action: &ActionKind)
        -> impl Future<Output = Result<(), ActionError>> + Send;

    fn main_phase_options(&self) -> MainPhaseOptions;

    fn battle_options(&self) -> BattleOptions;

    /// Advance to the next turn (turn player, turn counter).
    fn next_turn(&mut self);

    /// `Some` once the duel is decided.
    fn outcome(&self) -> Option<DuelOutcome>;
}

/// Opening parameters of a duel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuelParams {
    pub life_points: u32,
    pub first_player: Player,
}

impl Default for DuelParams {
    fn default() -> Self {
        DuelParams {
            life_points: 8000,
            first_player: 0,
        }
    }
}

pub struct Duel<E> {
    engine: E,
    desk: QuestionDesk,
    opening: ActionQueue,
    queues: PhaseQueues,
    flags: SkipFlags,
    phase: Phase,
}

impl<E: DuelEngine> Duel<E> {
    pub fn new(engine: E, desk: QuestionDesk, params: DuelParams) -> Self {
        let mut opening = ActionQueue::default();
        opening.push(QueuedAction::new(ActionKind::SetLifePoints(params.life_points)));
        opening.push(QueuedAction::new(ActionKind::SetTurnPlayer(params.first_player)));

        Duel {
            engine,
            desk,
            opening,
            queues: PhaseQueues::default(),
            flags: SkipFlags::default(),
            phase: Phase::Draw,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Phase currently (or most recently) being processed.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn flags(&self) -> SkipFlags {
        self.flags
    }

    pub fn flags_mut(&mut self) -> &mut SkipFlags {
        &mut self.flags
    }

    pub fn queue(&self, phase: Phase) -> &ActionQueue {
        self.queues.get(phase)
    }

    /// Queue an action to run at the start of `phase`.
    pub fn enqueue(&mut self, phase: Phase, action: QueuedAction) {
        self.queues.push(phase, action);
    }

    /// Run the opening actions, then turns until the engine reports an
    /// outcome.
    pub async fn run(&mut self) -> Result<DuelOutcome, DuelError> {
        while let Some(QueuedAction { kind, on_done }) = self.opening.pop() {
            if let Err(source) = self.apply(&kind).await {
                self.opening.clear();
                return Err(DuelError::Setup(source));
            }
            if let Some(cb) = on_done {
                cb(&kind);
            }
        }

        loop {
            if let Some(outcome) = self.engine.outcome() {
                debug!(?outcome, "duel decided");
                return Ok(outcome);
            }
            self.run_turn().await?;
        }
    }

    /// Run one full turn.
    pub async fn run_turn(&mut self) -> Result<(), DuelError> {
        self.flags.reset_for_turn();
        self.flags.skip_draw = self.engine.turn_state().skip_draw;

        for phase in Phase::ORDER {
            self.run_phase(phase).await?;
            if self.engine.outcome().is_some() {
                break;
            }
        }
        Ok(())
    }

    async fn run_phase(&mut self, phase: Phase) -> Result<(), DuelError> {
        self.phase = phase;

        if self.flags.is_skipped(phase) {
            debug!(?phase, "phase skipped");
            self.drain(phase).await?;
            self.queues.get_mut(phase).clear();
            return Ok(());
        }

        self.engine.enter_phase(phase);

        match phase {
            Phase::Draw => {
                self.drain(phase).await?;

                let state = self.engine.turn_state();
                if state.turn_count != 0 && !state.draw_suppressed {
                    let draw = ActionKind::Draw {
                        player: state.turn_player,
                        count: 1,
                    };
                    self.apply(&draw)
                        .await
                        .map_err(|source| DuelError::Action { phase, source })?;

                    // The draw may have queued reactions.
                    self.drain(phase).await?;
                }
                Ok(())
            }
            Phase::Standby => self.drain(phase).await,
            Phase::Main1 | Phase::Battle | Phase::Main2 => self.question_rounds(phase).await,
            Phase::End => {
                self.drain(phase).await?;
                self.engine.next_turn();
                Ok(())
            }
        }
    }

    async fn question_rounds(&mut self, phase: Phase) -> Result<(), DuelError> {
        loop {
            self.drain(phase).await?;

            let player = self.engine.turn_state().turn_player;
            let question = match phase {
                Phase::Battle => Question::BattlePhase {
                    player,
                    options: self.engine.battle_options(),
                },
                _ => Question::MainPhase {
                    player,
                    phase,
                    options: self.engine.main_phase_options(),
                },
            };

            let answer = self.desk.ask(question).await?;
            trace!(?phase, ?answer, "answer received");

            match (phase, answer) {
                (Phase::Main1, Answer::EnterBattle) => return Ok(()),
                (Phase::Main1, Answer::EnterEnd) => {
                    self.flags.skip_battle = true;
                    self.flags.skip_main2 = true;
                    return Ok(());
                }
                (Phase::Battle, Answer::EnterMain2) => return Ok(()),
                (Phase::Battle, Answer::EnterEnd) => {
                    self.flags.skip_main2 = true;
                    return Ok(());
                }
                (Phase::Main2, Answer::EnterEnd) => return Ok(()),
                (_, Answer::Act(action)) => {
                    self.queues.push(phase, QueuedAction::new(action));
                }
                (_, other) => {
                    debug!(?phase, answer = ?other, "answer not valid in this phase, asking again");
                }
            }
        }
    }

    /// Run `phase`'s queue front to back. On failure the remaining entries
    /// are dropped.
    async fn drain(&mut self, phase: Phase) -> Result<(), DuelError> {
        while let Some(QueuedAction { kind, on_done }) = self.queues.get_mut(phase).pop() {
            if let Err(source) = self.apply(&kind).await {
                let dropped = self.queues.get(phase).len();
                self.queues.get_mut(phase).clear();
                warn!(?phase, action = kind.tag(), dropped, "action failed, phase queue aborted");
                return Err(DuelError::Action { phase, source });
            }
            if let Some(cb) = on_done {
                cb(&kind);
            }
        }
        Ok(())
    }

    async fn apply(&mut self, action: &ActionKind) -> Result<(), ActionError> {
        match action {
            ActionKind::SkipPhase(target) => {
                if !self.flags.skip(*target) {
                    debug!(phase = ?target, "phase cannot be skipped");
                }
                Ok(())
            }
            other => self.engine.perform(other).await,
        }
    }
}
