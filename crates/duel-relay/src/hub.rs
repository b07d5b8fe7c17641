//! Shared session state.
//!
//! The hub owns the session directory, the in-flight spawns, and a clone of
//! every live session's process handle. All mutation goes through one
//! async mutex; each visible change publishes exactly one snapshot on the
//! broadcast channel, sent while the lock is held so subscribers see
//! changes in order.
//!
//! Joining is a three-way decision made under the lock:
//! - the key names a live session: the caller is added as a member;
//! - another connection is already spawning the key: the caller waits;
//! - otherwise the caller reserves a fresh port and must spawn.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info};

use duel_core::{Directory, DirectorySnapshot, PortAllocator, SessionKey};

use crate::error::HubError;
use crate::supervisor::ProcessHandle;

/// Lobby subscribers lagging further than this get a fresh snapshot.
const UPDATE_CAPACITY: usize = 64;

/// Progress of a spawn that other joiners are waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnState {
    Spawning,
    Ready(u16),
    Failed,
}

/// Outcome of [`SessionHub::join`].
#[derive(Debug)]
pub enum JoinTicket {
    /// The caller reserved `port` and must start the engine, then call
    /// [`SessionHub::open_session`] or [`SessionHub::abandon`].
    Host { port: u16 },
    /// The session is live and the caller was added to it.
    Attach { port: u16 },
    /// Another caller is starting this session; wait for the outcome, then
    /// call [`SessionHub::attach_waiter`].
    Await(watch::Receiver<SpawnState>),
}

#[derive(Default)]
struct HubState {
    directory: Directory,
    pending: HashMap<SessionKey, watch::Sender<SpawnState>>,
    processes: HashMap<SessionKey, ProcessHandle>,
}

pub struct SessionHub {
    state: Mutex<HubState>,
    allocator: PortAllocator,
    updates: broadcast::Sender<Arc<DirectorySnapshot>>,
}

impl SessionHub {
    pub fn new(allocator: PortAllocator) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        SessionHub {
            state: Mutex::new(HubState::default()),
            allocator,
            updates,
        }
    }

    /// Receive every directory change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DirectorySnapshot>> {
        self.updates.subscribe()
    }

    pub async fn snapshot(&self) -> Arc<DirectorySnapshot> {
        let state = self.state.lock().await;
        Arc::new(state.directory.snapshot())
    }

    pub async fn join(&self, key: SessionKey, member: String) -> Result<JoinTicket, HubError> {
        let mut state = self.state.lock().await;

        if let Some(port) = state.directory.get(&key).map(|s| s.port) {
            state.directory.add_member(&key, member)?;
            self.publish(&state);
            return Ok(JoinTicket::Attach { port });
        }

        if let Some(spawn) = state.pending.get(&key) {
            debug!(%key, "spawn in flight, waiting");
            return Ok(JoinTicket::Await(spawn.subscribe()));
        }

        let port = self
            .allocator
            .allocate(&state.directory)
            .ok_or(HubError::PortsExhausted {
                min: self.allocator.min(),
                max: self.allocator.max(),
            })?;
        state.directory.reserve(key.clone(), port)?;
        let (spawn, _) = watch::channel(SpawnState::Spawning);
        state.pending.insert(key.clone(), spawn);
        info!(%key, port, "port reserved");
        Ok(JoinTicket::Host { port })
    }

    /// Promote a reservation to a live session owned by `process`.
    pub async fn open_session(
        &self,
        key: &SessionKey,
        member: String,
        process: ProcessHandle,
    ) -> Result<(), HubError> {
        let mut state = self.state.lock().await;
        let port = process.port();

        if let Err(err) = state.directory.create(key.clone(), port, member) {
            state.directory.release(key);
            if let Some(spawn) = state.pending.remove(key) {
                spawn.send_replace(SpawnState::Failed);
            }
            return Err(err.into());
        }
        state.processes.insert(key.clone(), process);
        if let Some(spawn) = state.pending.remove(key) {
            spawn.send_replace(SpawnState::Ready(port));
        }
        info!(%key, port, "session open");
        self.publish(&state);
        Ok(())
    }

    /// Drop a reservation whose spawn failed and fail its waiters.
    pub async fn abandon(&self, key: &SessionKey) {
        let mut state = self.state.lock().await;
        if let Some(port) = state.directory.release(key) {
            info!(%key, port, "reservation released");
        }
        if let Some(spawn) = state.pending.remove(key) {
            spawn.send_replace(SpawnState::Failed);
        }
    }

    /// Add a member who waited on the host. Returns the session's port.
    pub async fn attach_waiter(&self, key: &SessionKey, member: String) -> Result<u16, HubError> {
        let mut state = self.state.lock().await;
        let port = state
            .directory
            .get(key)
            .map(|s| s.port)
            .ok_or_else(|| duel_core::DirectoryError::UnknownSession(key.clone()))?;
        state.directory.add_member(key, member)?;
        self.publish(&state);
        Ok(port)
    }

    /// Add `member` unless already listed.
    pub async fn ready_for_duelist(&self, key: &SessionKey, member: &str) {
        let mut state = self.state.lock().await;
        let listed = match state.directory.get(key) {
            Some(session) => session.players.iter().any(|p| p == member),
            None => return,
        };
        if !listed && state.directory.add_member(key, member).is_ok() {
            self.publish(&state);
        }
    }

    pub async fn remove_member(&self, key: &SessionKey, member: &str) {
        let mut state = self.state.lock().await;
        if state.directory.remove_member(key, member) {
            self.publish(&state);
        }
    }

    pub async fn mark_started(&self, key: &SessionKey) {
        let mut state = self.state.lock().await;
        if state.directory.mark_started(key) {
            self.publish(&state);
        }
    }

    /// Remove a session and terminate its process.
    pub async fn close_session(&self, key: &SessionKey) -> bool {
        let mut state = self.state.lock().await;
        if let Some(process) = state.processes.remove(key) {
            process.terminate();
        }
        match state.directory.remove(key) {
            Some(info) => {
                info!(%key, port = info.port, "session closed");
                self.publish(&state);
                true
            }
            None => false,
        }
    }

    /// A member's connection went away. An emptied session is closed.
    pub async fn depart(&self, key: &SessionKey, member: &str) {
        let mut state = self.state.lock().await;
        if !state.directory.remove_member(key, member) {
            return;
        }

        let emptied = state
            .directory
            .get(key)
            .map_or(false, |s| s.players.is_empty());
        if emptied {
            state.directory.remove(key);
            if let Some(process) = state.processes.remove(key) {
                process.terminate();
            }
            info!(%key, "last member left, session closed");
        }
        self.publish(&state);
    }

    fn publish(&self, state: &HubState) {
        // No subscribers is fine.
        let _ = self.updates.send(Arc::new(state.directory.snapshot()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn hub(min: u16, max: u16) -> Arc<SessionHub> {
        Arc::new(SessionHub::new(PortAllocator::new(min, max)))
    }

    fn key(s: &str) -> SessionKey {
        SessionKey::new(s)
    }

    async fn host(hub: &SessionHub, k: &str, member: &str) -> ProcessHandle {
        let port = match hub.join(key(k), member.into()).await.unwrap() {
            JoinTicket::Host { port } => port,
            other => panic!("expected host ticket, got {other:?}"),
        };
        let process = ProcessHandle::detached(port);
        hub.open_session(&key(k), member.into(), process.clone())
            .await
            .unwrap();
        process
    }

    #[tokio::test]
    async fn racing_joins_spawn_once_and_both_attach() {
        let hub = hub(7000, 7010);
        let mut updates = hub.subscribe();

        let (a, b) = tokio::join!(
            hub.join(key("0race"), "alice".into()),
            hub.join(key("0race"), "bob".into())
        );
        let mut tickets = vec![a.unwrap(), b.unwrap()];
        tickets.sort_by_key(|t| matches!(t, JoinTicket::Await(_)));

        let port = match &tickets[0] {
            JoinTicket::Host { port } => *port,
            other => panic!("expected host, got {other:?}"),
        };
        let mut waiter = match tickets.pop() {
            Some(JoinTicket::Await(rx)) => rx,
            other => panic!("expected await, got {other:?}"),
        };

        // Nothing visible while spawning.
        assert!(hub.snapshot().await.is_empty());
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));

        hub.open_session(&key("0race"), "alice".into(), ProcessHandle::detached(port))
            .await
            .unwrap();

        let state = *waiter
            .wait_for(|s| *s != SpawnState::Spawning)
            .await
            .unwrap();
        assert_eq!(state, SpawnState::Ready(port));
        assert_eq!(hub.attach_waiter(&key("0race"), "bob".into()).await, Ok(port));

        let snapshot = hub.snapshot().await;
        let session = snapshot.get(&key("0race")).unwrap();
        assert_eq!(session.port, 7000);
        assert_eq!(session.players, vec!["alice".to_string(), "bob".to_string()]);

        assert_eq!(updates.recv().await.unwrap().len(), 1);
        assert_eq!(
            updates.recv().await.unwrap().get(&key("0race")).unwrap().players.len(),
            2
        );
    }

    #[tokio::test]
    async fn late_joiner_attaches_directly() {
        let hub = hub(7000, 7010);
        host(&hub, "1x", "alice").await;

        match hub.join(key("1x"), "bob".into()).await.unwrap() {
            JoinTicket::Attach { port } => assert_eq!(port, 7000),
            other => panic!("expected attach, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn host_disconnect_empties_directory_with_one_broadcast() {
        let hub = hub(7000, 7010);
        let process = host(&hub, "A", "x").await;

        let mut updates = hub.subscribe();
        assert!(hub.close_session(&key("A")).await);

        let update = updates.recv().await.unwrap();
        assert!(update.is_empty());
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
        assert!(process.is_terminated());

        // Second close changes nothing and says nothing.
        assert!(!hub.close_session(&key("A")).await);
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn last_departure_closes_session() {
        let hub = hub(7000, 7010);
        let process = host(&hub, "2duel", "alice").await;
        hub.join(key("2duel"), "bob".into()).await.unwrap();
        hub.remove_member(&key("2duel"), "alice").await;

        let mut updates = hub.subscribe();
        hub.depart(&key("2duel"), "bob").await;

        assert!(updates.recv().await.unwrap().is_empty());
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
        assert!(process.is_terminated());
    }

    #[tokio::test]
    async fn departure_of_unknown_member_is_silent() {
        let hub = hub(7000, 7010);
        host(&hub, "0q", "alice").await;

        let mut updates = hub.subscribe();
        hub.depart(&key("0q"), "mallory").await;
        hub.depart(&key("nope"), "alice").await;
        hub.remove_member(&key("0q"), "mallory").await;
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn membership_and_start_updates() {
        let hub = hub(7000, 7010);
        host(&hub, "0m", "alice").await;
        hub.join(key("0m"), "bob".into()).await.unwrap();

        let mut updates = hub.subscribe();
        // Already listed: no change.
        hub.ready_for_duelist(&key("0m"), "bob").await;
        hub.remove_member(&key("0m"), "bob").await;
        hub.ready_for_duelist(&key("0m"), "bob").await;
        hub.mark_started(&key("0m")).await;
        hub.mark_started(&key("0m")).await;

        assert_eq!(updates.recv().await.unwrap().get(&key("0m")).unwrap().players.len(), 1);
        assert_eq!(updates.recv().await.unwrap().get(&key("0m")).unwrap().players.len(), 2);
        assert!(updates.recv().await.unwrap().get(&key("0m")).unwrap().started);
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn exhausted_pool_refuses_new_keys() {
        let hub = hub(7000, 7001);
        host(&hub, "0one", "alice").await;

        let err = hub.join(key("0two"), "bob".into()).await.unwrap_err();
        assert_eq!(err, HubError::PortsExhausted { min: 7000, max: 7001 });

        // Existing sessions still accept members.
        assert!(matches!(
            hub.join(key("0one"), "carol".into()).await,
            Ok(JoinTicket::Attach { port: 7000 })
        ));
    }

    #[tokio::test]
    async fn reservations_hold_ports_until_abandoned() {
        let hub = hub(7000, 7002);

        let first = hub.join(key("0a"), "alice".into()).await.unwrap();
        assert!(matches!(first, JoinTicket::Host { port: 7000 }));
        let second = hub.join(key("0b"), "bob".into()).await.unwrap();
        assert!(matches!(second, JoinTicket::Host { port: 7001 }));

        let mut waiter = match hub.join(key("0a"), "carol".into()).await.unwrap() {
            JoinTicket::Await(rx) => rx,
            other => panic!("expected await, got {other:?}"),
        };

        hub.abandon(&key("0a")).await;
        let state = *waiter
            .wait_for(|s| *s != SpawnState::Spawning)
            .await
            .unwrap();
        assert_eq!(state, SpawnState::Failed);

        // Port 7000 is free again.
        assert!(matches!(
            hub.join(key("0c"), "dave".into()).await,
            Ok(JoinTicket::Host { port: 7000 })
        ));
    }
}
