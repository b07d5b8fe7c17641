//! Turn phases and per-turn skip flags.

/// One phase of a duel turn, in execution order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Phase {
    Draw,
    Standby,
    Main1,
    Battle,
    Main2,
    End,
}

impl Phase {
    /// All phases in the order a turn visits them.
    pub const ORDER: [Phase; 6] = [
        Phase::Draw,
        Phase::Standby,
        Phase::Main1,
        Phase::Battle,
        Phase::Main2,
        Phase::End,
    ];

    /// Phase that follows this one; `End` wraps to the next turn's `Draw`.
    pub fn next(self) -> Phase {
        match self {
            Phase::Draw => Phase::Standby,
            Phase::Standby => Phase::Main1,
            Phase::Main1 => Phase::Battle,
            Phase::Battle => Phase::Main2,
            Phase::Main2 => Phase::End,
            Phase::End => Phase::Draw,
        }
    }

    /// Numeric id used by the rules engine (`DRAW_PHASE = 0` .. `END_PHASE = 5`).
    pub fn as_u8(self) -> u8 {
        match self {
            Phase::Draw => 0,
            Phase::Standby => 1,
            Phase::Main1 => 2,
            Phase::Battle => 3,
            Phase::Main2 => 4,
            Phase::End => 5,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Phase::ORDER.get(usize::from(v)).copied()
    }

    pub(crate) fn index(self) -> usize {
        usize::from(self.as_u8())
    }
}

/// Per-turn skip flags.
///
/// `skip_draw` is owned by the rules engine and survives the turn reset;
/// the others are cleared at the start of every turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipFlags {
    pub skip_draw: bool,
    pub skip_standby: bool,
    pub skip_battle: bool,
    pub skip_main2: bool,
}

impl SkipFlags {
    pub fn is_skipped(&self, phase: Phase) -> bool {
        match phase {
            Phase::Draw => self.skip_draw,
            Phase::Standby => self.skip_standby,
            Phase::Battle => self.skip_battle,
            Phase::Main2 => self.skip_main2,
            Phase::Main1 | Phase::End => false,
        }
    }

    /// Set the flag for `phase`. Main1 and End cannot be skipped; returns
    /// `false` for them.
    pub fn skip(&mut self, phase: Phase) -> bool {
        match phase {
            Phase::Draw => self.skip_draw = true,
            Phase::Standby => self.skip_standby = true,
            Phase::Battle => self.skip_battle = true,
            Phase::Main2 => self.skip_main2 = true,
            Phase::Main1 | Phase::End => return false,
        }
        true
    }

    /// Start-of-turn reset.
    pub fn reset_for_turn(&mut self) {
        *self = SkipFlags {
            skip_draw: self.skip_draw,
            ..SkipFlags::default()
        };
    }
}
