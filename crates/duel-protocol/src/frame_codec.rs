//! Binary encoding/decoding of engine protocol frames.
//!
//! Framing model:
//!
//! ```text
//! [0..2]  : length (u16 LE) = 1 + payload length
//! [2]     : msg_type
//! [3..]   : payload (length - 1 bytes)
//! ```
//!
//! Lifecycle-relevant CTOS payloads:
//!
//! ```text
//! PLAYER_INFO (0x10):
//!   [0..40]  name, 20 UTF-16LE units, NUL-terminated
//!
//! JOIN_GAME (0x12):
//!   [0..2]   version (u16 LE)
//!   [2..4]   padding
//!   [4..8]   game id (u32 LE)
//!   [8..48]  password, 20 UTF-16LE units, NUL-terminated
//!
//! HS_KICK (0x24):
//!   [0]      slot
//!
//! LEAVE_GAME, HS_TODUELIST, HS_TOOBSERVER, HS_READY, HS_NOTREADY,
//! HS_START:
//!   [no payload]
//! ```
//!
//! STOC `ERROR_MSG` (0x02), the only frame the relay originates:
//!
//! ```text
//!   [0]      msg (1 = join error)
//!   [1..4]   padding
//!   [4..8]   code (u32 LE)
//! ```
//!
//! `decode_frame` handles **one frame per call** and reports how many bytes
//! it consumed; [`FrameDecoder`] reassembles frames from arbitrary stream
//! chunks.

use std::fmt;

use crate::wire_types::{
    CtosType, StocType, ERRMSG_JOINERROR, JOIN_GAME_HEADER_LEN, LENGTH_PREFIX_LEN,
    MAX_FRAME_BODY_LEN, NAME_BYTES, NAME_LEN,
};

/// Errors that can arise when encoding/decoding a frame.
#[derive(Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too short for the expected fields.
    Truncated,
    /// Length prefix of zero: no room for a type byte.
    EmptyFrame,
    /// Payload does not fit the `u16` length prefix.
    FrameTooLarge(usize),
    /// Message type is not a known CTOS/STOC type.
    UnknownMessageType(u8),
    /// A UTF-16 text field is malformed.
    InvalidText(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Truncated => write!(f, "Buffer truncated"),
            ProtocolError::EmptyFrame => write!(f, "Frame has no message type"),
            ProtocolError::FrameTooLarge(len) => {
                write!(f, "Frame body of {} bytes exceeds {}", len, MAX_FRAME_BODY_LEN)
            }
            ProtocolError::UnknownMessageType(t) => write!(f, "Unknown message type: {:#04x}", t),
            ProtocolError::InvalidText(field) => write!(f, "Invalid text field: {}", field),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// One raw frame: type byte plus payload, without the length prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: u8, payload: impl Into<Vec<u8>>) -> Self {
        Frame {
            msg_type,
            payload: payload.into(),
        }
    }

    /// Lifecycle-relevant CTOS type, if this is one.
    pub fn ctos_type(&self) -> Option<CtosType> {
        CtosType::from_u8(self.msg_type)
    }
}

// ============================================================================
// FRAMES
// ============================================================================

/// Decode the frame at the start of `buf`.
///
/// Returns the frame and the number of bytes consumed. `Truncated` means
/// the buffer does not yet hold the whole frame.
pub fn decode_frame(buf: &[u8]) -> Result<(Frame, usize), ProtocolError> {
    if buf.len() < LENGTH_PREFIX_LEN {
        return Err(ProtocolError::Truncated);
    }

    let body_len = read_u16_le(&buf[0..2]) as usize;
    if body_len == 0 {
        return Err(ProtocolError::EmptyFrame);
    }

    let total = LENGTH_PREFIX_LEN + body_len;
    if buf.len() < total {
        return Err(ProtocolError::Truncated);
    }

    let frame = Frame {
        msg_type: buf[LENGTH_PREFIX_LEN],
        payload: buf[LENGTH_PREFIX_LEN + 1..total].to_vec(),
    };
    Ok((frame, total))
}

/// Encode a frame with its length prefix, appending to `out`.
pub fn encode_frame(frame: &Frame, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let body_len = 1 + frame.payload.len();
    if body_len > MAX_FRAME_BODY_LEN {
        return Err(ProtocolError::FrameTooLarge(body_len));
    }

    out.reserve(LENGTH_PREFIX_LEN + body_len);
    out.extend_from_slice(&(body_len as u16).to_le_bytes());
    out.push(frame.msg_type);
    out.extend_from_slice(&frame.payload);
    Ok(())
}

// ============================================================================
// CTOS: client → server
// ============================================================================

/// Typed view of the CTOS frames the relay understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtosMessage {
    PlayerInfo {
        name: String,
    },
    JoinGame {
        version: u16,
        game_id: u32,
        password: String,
    },
    LeaveGame,
    ToDuelist,
    ToObserver,
    Ready,
    NotReady,
    Kick {
        slot: u8,
    },
    Start,
}

/// Decode a lifecycle CTOS frame.
pub fn decode_ctos(frame: &Frame) -> Result<CtosMessage, ProtocolError> {
    let ctos = frame
        .ctos_type()
        .ok_or(ProtocolError::UnknownMessageType(frame.msg_type))?;
    let buf = frame.payload.as_slice();

    match ctos {
        CtosType::PlayerInfo => Ok(CtosMessage::PlayerInfo {
            name: read_utf16_field(buf, "name")?,
        }),
        CtosType::JoinGame => decode_join_game(buf),
        CtosType::LeaveGame => Ok(CtosMessage::LeaveGame),
        CtosType::ToDuelist => Ok(CtosMessage::ToDuelist),
        CtosType::ToObserver => Ok(CtosMessage::ToObserver),
        CtosType::Ready => Ok(CtosMessage::Ready),
        CtosType::NotReady => Ok(CtosMessage::NotReady),
        CtosType::Kick => {
            let slot = *buf.first().ok_or(ProtocolError::Truncated)?;
            Ok(CtosMessage::Kick { slot })
        }
        CtosType::Start => Ok(CtosMessage::Start),
    }
}

/// Encode a CTOS message as a full frame (length prefix included).
pub fn encode_ctos(msg: &CtosMessage, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let (ctos, payload) = match msg {
        CtosMessage::PlayerInfo { name } => {
            let mut payload = Vec::with_capacity(NAME_BYTES);
            write_utf16_field(name, &mut payload);
            (CtosType::PlayerInfo, payload)
        }
        CtosMessage::JoinGame {
            version,
            game_id,
            password,
        } => {
            let mut payload = Vec::with_capacity(JOIN_GAME_HEADER_LEN + NAME_BYTES);
            payload.extend_from_slice(&version.to_le_bytes());
            payload.extend_from_slice(&[0, 0]);
            payload.extend_from_slice(&game_id.to_le_bytes());
            write_utf16_field(password, &mut payload);
            (CtosType::JoinGame, payload)
        }
        CtosMessage::LeaveGame => (CtosType::LeaveGame, Vec::new()),
        CtosMessage::ToDuelist => (CtosType::ToDuelist, Vec::new()),
        CtosMessage::ToObserver => (CtosType::ToObserver, Vec::new()),
        CtosMessage::Ready => (CtosType::Ready, Vec::new()),
        CtosMessage::NotReady => (CtosType::NotReady, Vec::new()),
        CtosMessage::Kick { slot } => (CtosType::Kick, vec![*slot]),
        CtosMessage::Start => (CtosType::Start, Vec::new()),
    };

    encode_frame(&Frame::new(ctos as u8, payload), out)
}

fn decode_join_game(buf: &[u8]) -> Result<CtosMessage, ProtocolError> {
    if buf.len() < JOIN_GAME_HEADER_LEN {
        return Err(ProtocolError::Truncated);
    }

    let version = read_u16_le(&buf[0..2]);
    let game_id = read_u32_le(&buf[4..8]);
    let password = read_utf16_field(&buf[JOIN_GAME_HEADER_LEN..], "password")?;

    Ok(CtosMessage::JoinGame {
        version,
        game_id,
        password,
    })
}

// ============================================================================
// STOC: server → client
// ============================================================================

/// Encode a STOC `ERROR_MSG` join refusal with the given code.
pub fn encode_join_refusal(code: u32, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let mut payload = Vec::with_capacity(8);
    payload.push(ERRMSG_JOINERROR);
    payload.extend_from_slice(&[0, 0, 0]);
    payload.extend_from_slice(&code.to_le_bytes());
    encode_frame(&Frame::new(StocType::ErrorMsg as u8, payload), out)
}

/// Decode a STOC `ERROR_MSG` join refusal, returning its code.
pub fn decode_join_refusal(frame: &Frame) -> Result<u32, ProtocolError> {
    if StocType::from_u8(frame.msg_type) != Some(StocType::ErrorMsg) {
        return Err(ProtocolError::UnknownMessageType(frame.msg_type));
    }
    let buf = frame.payload.as_slice();
    if buf.len() < 8 {
        return Err(ProtocolError::Truncated);
    }
    if buf[0] != ERRMSG_JOINERROR {
        return Err(ProtocolError::UnknownMessageType(buf[0]));
    }
    Ok(read_u32_le(&buf[4..8]))
}

// -----------------------------------------------------------------------------
// Stream reassembly
// -----------------------------------------------------------------------------

/// Reassembles frames from a byte stream whose reads may split or
/// coalesce frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completes, in order.
    ///
    /// Zero-length frames carry no type byte and are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut offset = 0;
        loop {
            match decode_frame(&self.buf[offset..]) {
                Ok((frame, used)) => {
                    frames.push(frame);
                    offset += used;
                }
                Err(ProtocolError::EmptyFrame) => offset += LENGTH_PREFIX_LEN,
                Err(_) => break,
            }
        }

        self.buf.drain(..offset);
        frames
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a NUL-terminated UTF-16LE field of at most [`NAME_LEN`] units.
///
/// Clients are not strict about the field width, so a short buffer is
/// accepted as long as it holds whole code units.
fn read_utf16_field(buf: &[u8], field: &'static str) -> Result<String, ProtocolError> {
    let limit = buf.len().min(NAME_BYTES);
    let units: Vec<u16> = buf[..limit]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();

    String::from_utf16(&units).map_err(|_| ProtocolError::InvalidText(field))
}

/// Write `text` as a fixed-width UTF-16LE field, truncated to leave room
/// for the terminating NUL.
fn write_utf16_field(text: &str, out: &mut Vec<u8>) {
    let mut written = 0;
    for unit in text.encode_utf16().take(NAME_LEN - 1) {
        out.extend_from_slice(&unit.to_le_bytes());
        written += 1;
    }
    for _ in written..NAME_LEN {
        out.extend_from_slice(&[0, 0]);
    }
}
