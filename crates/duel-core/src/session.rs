//! Session identity and per-session metadata.
//!
//! A session is keyed by the host-chosen string the client sends as the
//! join password. The relay never interprets that string beyond its first
//! character, which selects the engine ruleset.

use std::fmt;

/// Opaque host-chosen session key.
///
/// Used as the directory key, as the lobby filter, and (inside the join
/// frame) as the password forwarded to the engine process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        SessionKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ruleset selected by the leading character of the key.
    pub fn ruleset(&self) -> Ruleset {
        self.0
            .chars()
            .next()
            .and_then(Ruleset::from_char)
            .unwrap_or(Ruleset::Standard)
    }

    /// Engine configuration file for this key.
    pub fn config_file(&self) -> &'static str {
        self.ruleset().config_file()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        SessionKey::new(s)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        SessionKey(s)
    }
}

/// Card-pool ruleset encoded in the first character of a session key.
///
/// ```text
/// '0' => Ocg
/// '1' => Tcg
/// '2' => Mixed (OCG + TCG)
/// anything else (or empty) => Standard
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ruleset {
    Ocg,
    Tcg,
    Mixed,
    Standard,
}

impl Ruleset {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Ruleset::Ocg),
            '1' => Some(Ruleset::Tcg),
            '2' => Some(Ruleset::Mixed),
            _ => None,
        }
    }

    /// Name of the engine configuration file passed on the command line.
    pub fn config_file(self) -> &'static str {
        match self {
            Ruleset::Ocg => "0-config.txt",
            Ruleset::Tcg => "1-config.txt",
            Ruleset::Mixed => "2-config.txt",
            Ruleset::Standard => "config.txt",
        }
    }
}

/// Directory entry for one live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Engine port, unique among active sessions.
    pub port: u16,

    /// Member identifiers in join order.
    pub players: Vec<String>,

    /// Set once the host starts the duel.
    pub started: bool,
}

impl SessionInfo {
    pub fn new(port: u16, first_member: impl Into<String>) -> Self {
        SessionInfo {
            port,
            players: vec![first_member.into()],
            started: false,
        }
    }
}
