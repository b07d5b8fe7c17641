//! Low-level wire types and constants.
//!
//! This module defines:
//! - Message type IDs for client → server (CTOS) and server → client
//!   (STOC) frames.
//! - Frame header layout.
//! - Fixed-width field sizes.
//!
//! The actual encode/decode logic lives in `frame_codec`.

/// Size of the little-endian `u16` length prefix.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Largest value the length prefix can carry (type byte + payload).
pub const MAX_FRAME_BODY_LEN: usize = u16::MAX as usize;

/// Width of a name / password field, in UTF-16 code units.
pub const NAME_LEN: usize = 20;

/// Width of a name / password field, in bytes.
pub const NAME_BYTES: usize = NAME_LEN * 2;

/// Client → server message types.
///
/// Only the lifecycle-relevant subset is named; every other type id is
/// opaque to the relay.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CtosType {
    /// Player name.
    PlayerInfo = 0x10,

    /// Join (or create) a game; the password field carries the session key.
    JoinGame = 0x12,

    /// Leave the room.
    LeaveGame = 0x13,

    /// Take a duelist slot.
    ToDuelist = 0x20,

    /// Move to the spectator seats.
    ToObserver = 0x21,

    Ready = 0x22,

    NotReady = 0x23,

    /// Host kicks a slot.
    Kick = 0x24,

    /// Host starts the duel.
    Start = 0x25,
}

impl CtosType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x10 => Some(CtosType::PlayerInfo),
            0x12 => Some(CtosType::JoinGame),
            0x13 => Some(CtosType::LeaveGame),
            0x20 => Some(CtosType::ToDuelist),
            0x21 => Some(CtosType::ToObserver),
            0x22 => Some(CtosType::Ready),
            0x23 => Some(CtosType::NotReady),
            0x24 => Some(CtosType::Kick),
            0x25 => Some(CtosType::Start),
            _ => None,
        }
    }
}

/// Server → client message types produced by the relay itself.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StocType {
    /// Error report; the relay only ever sends join errors.
    ErrorMsg = 0x02,
}

impl StocType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x02 => Some(StocType::ErrorMsg),
            _ => None,
        }
    }
}

/// `ERROR_MSG` sub-type for join failures.
pub const ERRMSG_JOINERROR: u8 = 1;

/// Join error code: the room could not be created (no free engine port,
/// engine failed to start).
pub const JOINERROR_UNAVAILABLE: u32 = 0;

/// Fixed part of the `JOIN_GAME` payload before the password field:
/// `u16 version`, 2 bytes padding, `u32 game id`.
pub const JOIN_GAME_HEADER_LEN: usize = 8;
