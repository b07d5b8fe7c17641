//! Client transports.
//!
//! Each adapter splits its socket into a reader task feeding
//! [`ClientIo::inbound`](crate::types::ClientIo) and a writer task draining
//! the outbound channel, so the relay only ever sees byte channels.
//!
//! - [`tcp`] : raw engine protocol stream
//! - [`ws`]  : engine protocol carried in WebSocket messages

pub mod tcp;
pub mod ws;
