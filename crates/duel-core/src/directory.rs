//! In-memory session directory.
//!
//! Single source of truth for "what games exist right now":
//! - `sessions`: live sessions (process spawned and ready), visible in
//!   snapshots and lobby broadcasts.
//! - `reserved`: keys whose process is still starting. They hold a port so
//!   the allocator cannot hand it out twice, but stay invisible until the
//!   engine reports ready.
//!
//! The directory itself is not synchronized; the relay wraps it in a
//! single lock and publishes snapshots taken under that lock.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::DirectoryError;
use crate::session::{SessionInfo, SessionKey};

#[derive(Debug, Default)]
pub struct Directory {
    sessions: BTreeMap<SessionKey, SessionInfo>,
    reserved: BTreeMap<SessionKey, u16>,
}

impl Directory {
    pub fn new() -> Self {
        Directory::default()
    }

    /// Create a live session with its first member.
    ///
    /// A reservation for the same key is promoted (its port may be reused);
    /// any other holder of `port` is a collision.
    pub fn create(
        &mut self,
        key: SessionKey,
        port: u16,
        first_member: impl Into<String>,
    ) -> Result<(), DirectoryError> {
        if self.sessions.contains_key(&key) {
            return Err(DirectoryError::SessionExists(key));
        }

        let port_taken = self.sessions.values().any(|s| s.port == port)
            || self
                .reserved
                .iter()
                .any(|(k, p)| *p == port && *k != key);
        if port_taken {
            return Err(DirectoryError::PortInUse(port));
        }

        self.reserved.remove(&key);
        self.sessions.insert(key, SessionInfo::new(port, first_member));
        Ok(())
    }

    /// Append a member to a live session.
    pub fn add_member(
        &mut self,
        key: &SessionKey,
        member: impl Into<String>,
    ) -> Result<(), DirectoryError> {
        let session = self
            .sessions
            .get_mut(key)
            .ok_or_else(|| DirectoryError::UnknownSession(key.clone()))?;
        session.players.push(member.into());
        Ok(())
    }

    /// Remove the first occurrence of `member`.
    ///
    /// Returns `false` (and changes nothing) when the session or the member
    /// is absent.
    pub fn remove_member(&mut self, key: &SessionKey, member: &str) -> bool {
        let Some(session) = self.sessions.get_mut(key) else {
            return false;
        };
        match session.players.iter().position(|p| p == member) {
            Some(idx) => {
                session.players.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Flag a session as started. Returns `true` if the flag changed.
    pub fn mark_started(&mut self, key: &SessionKey) -> bool {
        match self.sessions.get_mut(key) {
            Some(session) if !session.started => {
                session.started = true;
                true
            }
            _ => false,
        }
    }

    /// Remove a live session, returning its last state.
    pub fn remove(&mut self, key: &SessionKey) -> Option<SessionInfo> {
        self.sessions.remove(key)
    }

    /// Hold `port` for `key` while its process starts.
    pub fn reserve(&mut self, key: SessionKey, port: u16) -> Result<(), DirectoryError> {
        if self.sessions.contains_key(&key) {
            return Err(DirectoryError::SessionExists(key));
        }
        if self.reserved.contains_key(&key) {
            return Err(DirectoryError::AlreadyReserved(key));
        }
        if self.ports_in_use().contains(&port) {
            return Err(DirectoryError::PortInUse(port));
        }
        self.reserved.insert(key, port);
        Ok(())
    }

    /// Drop a reservation, returning the port it held.
    pub fn release(&mut self, key: &SessionKey) -> Option<u16> {
        self.reserved.remove(key)
    }

    pub fn get(&self, key: &SessionKey) -> Option<&SessionInfo> {
        self.sessions.get(key)
    }

    pub fn is_reserved(&self, key: &SessionKey) -> bool {
        self.reserved.contains_key(key)
    }

    /// Ports held by live sessions and by reservations.
    pub fn ports_in_use(&self) -> BTreeSet<u16> {
        self.sessions
            .values()
            .map(|s| s.port)
            .chain(self.reserved.values().copied())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Immutable copy of the live sessions.
    pub fn snapshot(&self) -> DirectorySnapshot {
        DirectorySnapshot {
            sessions: self.sessions.clone(),
        }
    }
}

/// Point-in-time copy of the live sessions, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    sessions: BTreeMap<SessionKey, SessionInfo>,
}

impl DirectorySnapshot {
    pub fn get(&self, key: &SessionKey) -> Option<&SessionInfo> {
        self.sessions.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionKey, &SessionInfo)> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ports(&self) -> BTreeSet<u16> {
        self.sessions.values().map(|s| s.port).collect()
    }
}
