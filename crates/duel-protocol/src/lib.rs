//! duel-protocol
//!
//! Wire-level code for the duel relay.
//!
//! - [`frame_codec`] : length-prefixed engine frames, CTOS/STOC layouts
//! - [`extract`]     : lifecycle events from client frames
//! - [`lobby`]       : lobby control frames and directory JSON

pub mod wire_types;
pub mod frame_codec;
pub mod extract;
pub mod lobby;

pub use frame_codec::{
    ProtocolError,
    Frame,
    FrameDecoder,
    CtosMessage,
    decode_frame,
    encode_frame,
    decode_ctos,
    encode_ctos,
    encode_join_refusal,
    decode_join_refusal,
};
pub use extract::{extract, LifecycleEvent, StreamExtractor};
pub use lobby::{decode_directory, encode_directory, parse_command, LobbyCommand, SessionEntry};
