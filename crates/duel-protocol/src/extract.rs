//! Lifecycle event extraction.
//!
//! Classifies client frames into the handful of events that matter to the
//! session directory. Everything else, including malformed lifecycle
//! frames, is opaque: no event, no error. Nothing here touches shared
//! state.

use duel_core::SessionKey;

use crate::frame_codec::{decode_ctos, CtosMessage, Frame, FrameDecoder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Join (or create) the session named by the key.
    Join(SessionKey),
    /// The client announced its player name.
    Identify(String),
    /// Took a duelist slot.
    ReadyForDuelist,
    /// Left the room or moved to spectating.
    LeaveOrDemote,
    /// Host started the duel.
    Start,
}

impl LifecycleEvent {
    /// Whether the event only makes sense inside a session.
    pub fn is_session_scoped(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::ReadyForDuelist | LifecycleEvent::LeaveOrDemote | LifecycleEvent::Start
        )
    }
}

/// Classify one frame sent by a connection whose session key is
/// `current_key`.
///
/// Session-scoped events are dropped while the connection has no key.
pub fn extract(frame: &Frame, current_key: Option<&SessionKey>) -> Vec<LifecycleEvent> {
    let Ok(msg) = decode_ctos(frame) else {
        return Vec::new();
    };

    let event = match msg {
        CtosMessage::JoinGame { password, .. } if !password.is_empty() => {
            LifecycleEvent::Join(SessionKey::new(password))
        }
        CtosMessage::PlayerInfo { name } => LifecycleEvent::Identify(name),
        CtosMessage::ToDuelist => LifecycleEvent::ReadyForDuelist,
        CtosMessage::ToObserver | CtosMessage::LeaveGame => LifecycleEvent::LeaveOrDemote,
        CtosMessage::Start => LifecycleEvent::Start,
        _ => return Vec::new(),
    };

    if event.is_session_scoped() && current_key.is_none() {
        return Vec::new();
    }
    vec![event]
}

/// Per-connection extractor: reassembles frames from stream chunks and
/// tracks the session key across them, so a `Join` followed by
/// `HS_TODUELIST` in the same read classifies both.
#[derive(Debug, Default)]
pub struct StreamExtractor {
    decoder: FrameDecoder,
    key: Option<SessionKey>,
}

impl StreamExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(&self) -> Option<&SessionKey> {
        self.key.as_ref()
    }

    /// Feed a chunk of client bytes, returning the events of every frame it
    /// completes.
    ///
    /// The first `Join` fixes the connection's key; later joins are
    /// reported but do not rebind it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        for frame in self.decoder.push(chunk) {
            for event in extract(&frame, self.key.as_ref()) {
                if let LifecycleEvent::Join(key) = &event {
                    if self.key.is_none() {
                        self.key = Some(key.clone());
                    }
                }
                events.push(event);
            }
        }
        events
    }
}
