//! Lobby channel JSON.
//!
//! Control frames from lobby clients:
//!
//! ```text
//! {"action":"join"}    subscribe to directory updates
//! {"action":"leave"}   unsubscribe
//! ```
//!
//! Directory updates pushed to subscribers, keys sorted:
//!
//! ```text
//! {"<key>": {"port": 7000, "players": ["x"], "started": false}, ...}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use duel_core::{DirectorySnapshot, SessionInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum LobbyCommand {
    Join,
    Leave,
}

/// Parse one lobby control frame. Extra fields are ignored.
pub fn parse_command(text: &str) -> Result<LobbyCommand, serde_json::Error> {
    serde_json::from_str(text)
}

/// Wire form of one directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub port: u16,
    pub players: Vec<String>,
    pub started: bool,
}

impl From<&SessionInfo> for SessionEntry {
    fn from(info: &SessionInfo) -> Self {
        SessionEntry {
            port: info.port,
            players: info.players.clone(),
            started: info.started,
        }
    }
}

/// Serialize a directory snapshot for lobby subscribers.
pub fn encode_directory(snapshot: &DirectorySnapshot) -> Result<String, serde_json::Error> {
    let entries: BTreeMap<&str, SessionEntry> = snapshot
        .iter()
        .map(|(key, info)| (key.as_str(), SessionEntry::from(info)))
        .collect();
    serde_json::to_string(&entries)
}

/// Parse a directory update (client side).
pub fn decode_directory(text: &str) -> Result<BTreeMap<String, SessionEntry>, serde_json::Error> {
    serde_json::from_str(text)
}
