//! Per-connection relay.
//!
//! One task per engine-protocol client (TCP or WebSocket):
//!
//! - Before the client is attached to an engine, every byte it sends is
//!   buffered and scanned for lifecycle events. `JOIN_GAME` asks the hub
//!   for a ticket; hosting spawns the engine, waiting follows the racing
//!   host.
//! - Once the session is ready the relay connects to the engine port,
//!   flushes the buffer, and from then on forwards bytes verbatim in both
//!   directions. Lifecycle events are still extracted after forwarding to
//!   keep the directory current.
//! - Any end (client gone, engine link gone, engine process gone, refusal)
//!   runs a single teardown: the host closes its session and terminates
//!   the engine, other members depart.

use std::future::pending;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use duel_core::SessionKey;
use duel_protocol::wire_types::JOINERROR_UNAVAILABLE;
use duel_protocol::{encode_join_refusal, LifecycleEvent, StreamExtractor};

use crate::hub::{JoinTicket, SessionHub, SpawnState};
use crate::supervisor::{self, EngineExit, EngineLink, ProcessHandle, SpawnedEngine, Supervisor};
use crate::types::{ClientIo, ConnectionId};

/// What every relay task shares.
#[derive(Clone)]
pub struct RelayContext {
    pub hub: Arc<SessionHub>,
    pub supervisor: Arc<Supervisor>,
    pub max_pending_bytes: usize,
}

/// Drive one client connection to completion.
pub async fn run_connection(ctx: RelayContext, io: ClientIo) {
    let conn = io.conn;
    debug!(%conn, transport = ?io.transport, peer = ?io.peer, "relaying client");
    let mut connection = Connection::new(ctx, io);
    let reason = connection.pump().await;
    info!(%conn, ?reason, "connection closing");
    connection.teardown().await;
}

/// Why a connection stopped.
#[derive(Debug)]
enum Disconnect {
    ClientClosed,
    EngineClosed,
    EngineExited(Option<EngineExit>),
    Refused,
    PendingOverflow(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Not (yet) part of a session.
    None,
    /// Spawned the session's engine and owns its process.
    Host,
    /// Joined someone else's session.
    Member,
}

/// Result of a join that had to wait (spawn or racing host).
#[derive(Debug)]
enum JoinOutcome {
    Hosted(SpawnedEngine),
    Joined { port: u16 },
    Refused,
}

struct Connection {
    ctx: RelayContext,
    io: ClientIo,
    extractor: StreamExtractor,
    /// Name announced by PLAYER_INFO.
    announced: Option<String>,
    /// Key and member name this connection joined with.
    session: Option<(SessionKey, String)>,
    role: Role,
    pending: BytesMut,
    join: Option<JoinHandle<JoinOutcome>>,
    link: Option<EngineLink>,
    process: Option<ProcessHandle>,
    exit: Option<oneshot::Receiver<EngineExit>>,
}

impl Connection {
    fn new(ctx: RelayContext, io: ClientIo) -> Self {
        Connection {
            ctx,
            io,
            extractor: StreamExtractor::new(),
            announced: None,
            session: None,
            role: Role::None,
            pending: BytesMut::new(),
            join: None,
            link: None,
            process: None,
            exit: None,
        }
    }

    fn conn(&self) -> ConnectionId {
        self.io.conn
    }

    async fn pump(&mut self) -> Disconnect {
        loop {
            let step = tokio::select! {
                chunk = self.io.inbound.recv() => match chunk {
                    Some(bytes) => self.on_client_bytes(bytes).await,
                    None => Err(Disconnect::ClientClosed),
                },
                outcome = wait_join(&mut self.join) => {
                    self.join = None;
                    self.on_join_outcome(outcome).await
                }
                data = recv_link(&mut self.link) => match data {
                    Some(bytes) => {
                        if self.io.outbound.send(bytes).is_err() {
                            Err(Disconnect::ClientClosed)
                        } else {
                            Ok(())
                        }
                    }
                    None => Err(Disconnect::EngineClosed),
                },
                exit = wait_exit(&mut self.exit) => Err(Disconnect::EngineExited(exit)),
            };

            if let Err(reason) = step {
                return reason;
            }
        }
    }

    async fn on_client_bytes(&mut self, bytes: Bytes) -> Result<(), Disconnect> {
        let events = self.extractor.push(&bytes);

        match &self.link {
            Some(link) => {
                if !link.send(bytes) {
                    return Err(Disconnect::EngineClosed);
                }
            }
            None => {
                self.pending.extend_from_slice(&bytes);
                if self.pending.len() > self.ctx.max_pending_bytes {
                    return Err(Disconnect::PendingOverflow(self.pending.len()));
                }
            }
        }

        for event in events {
            self.on_event(event).await?;
        }
        Ok(())
    }

    async fn on_event(&mut self, event: LifecycleEvent) -> Result<(), Disconnect> {
        let conn = self.conn();
        match event {
            LifecycleEvent::Identify(name) => {
                if self.session.is_none() {
                    self.announced = Some(name);
                } else {
                    debug!(%conn, %name, "rename after join ignored");
                }
                Ok(())
            }
            LifecycleEvent::Join(key) => {
                if self.session.is_some() {
                    debug!(%conn, %key, "already joined, ignoring");
                    return Ok(());
                }
                self.start_join(key).await
            }
            LifecycleEvent::ReadyForDuelist => {
                if let Some((key, member)) = &self.session {
                    self.ctx.hub.ready_for_duelist(key, member).await;
                }
                Ok(())
            }
            LifecycleEvent::LeaveOrDemote => {
                if let Some((key, member)) = &self.session {
                    self.ctx.hub.remove_member(key, member).await;
                }
                Ok(())
            }
            LifecycleEvent::Start => {
                if let Some((key, _)) = &self.session {
                    self.ctx.hub.mark_started(key).await;
                }
                Ok(())
            }
        }
    }

    async fn start_join(&mut self, key: SessionKey) -> Result<(), Disconnect> {
        let conn = self.conn();
        let member = self
            .announced
            .clone()
            .unwrap_or_else(|| format!("player{}", conn));
        self.session = Some((key.clone(), member.clone()));

        let ticket = match self.ctx.hub.join(key.clone(), member.clone()).await {
            Ok(ticket) => ticket,
            Err(err) => {
                warn!(%conn, %key, error = %err, "join refused");
                return Err(self.refuse());
            }
        };

        match ticket {
            JoinTicket::Attach { port } => {
                info!(%conn, %key, port, %member, "joining live session");
                self.role = Role::Member;
                self.attach(port).await
            }
            JoinTicket::Host { port } => {
                info!(%conn, %key, port, %member, "hosting new session");
                let ctx = self.ctx.clone();
                self.join = Some(tokio::spawn(host_session(ctx, key, port, member)));
                Ok(())
            }
            JoinTicket::Await(spawn) => {
                info!(%conn, %key, %member, "waiting for racing host");
                let hub = self.ctx.hub.clone();
                self.join = Some(tokio::spawn(await_host(hub, key, member, spawn)));
                Ok(())
            }
        }
    }

    async fn on_join_outcome(&mut self, outcome: JoinOutcome) -> Result<(), Disconnect> {
        match outcome {
            JoinOutcome::Hosted(SpawnedEngine { handle, exit }) => {
                let port = handle.port();
                self.role = Role::Host;
                self.process = Some(handle);
                self.exit = Some(exit);
                self.attach(port).await
            }
            JoinOutcome::Joined { port } => {
                self.role = Role::Member;
                self.attach(port).await
            }
            JoinOutcome::Refused => Err(self.refuse()),
        }
    }

    /// Connect to the engine and flush everything buffered so far.
    async fn attach(&mut self, port: u16) -> Result<(), Disconnect> {
        let conn = self.conn();
        match supervisor::attach(port, &self.pending).await {
            Ok(link) => {
                debug!(%conn, port, flushed = self.pending.len(), "attached");
                self.pending.clear();
                self.link = Some(link);
                Ok(())
            }
            Err(e) => {
                warn!(%conn, port, error = %e, "engine connect failed");
                Err(Disconnect::EngineClosed)
            }
        }
    }

    /// Tell the client its join failed.
    fn refuse(&mut self) -> Disconnect {
        let mut frame = Vec::new();
        if encode_join_refusal(JOINERROR_UNAVAILABLE, &mut frame).is_ok() {
            let _ = self.io.outbound.send(Bytes::from(frame));
        }
        Disconnect::Refused
    }

    async fn teardown(mut self) {
        let conn = self.conn();
        self.link = None;
        self.io.reader.abort();

        if let Some(join) = self.join.take() {
            if let Some((key, member)) = self.session.clone() {
                tokio::spawn(finish_abandoned_join(self.ctx.hub.clone(), key, member, join));
            }
        }

        let Some((key, member)) = self.session.take() else {
            return;
        };
        match self.role {
            Role::Host => {
                if let Some(process) = self.process.take() {
                    process.terminate();
                }
                self.ctx.hub.close_session(&key).await;
                debug!(%conn, %key, "hosted session torn down");
            }
            Role::Member => {
                self.ctx.hub.depart(&key, &member).await;
                debug!(%conn, %key, %member, "departed");
            }
            Role::None => {}
        }
    }
}

async fn host_session(ctx: RelayContext, key: SessionKey, port: u16, member: String) -> JoinOutcome {
    match ctx.supervisor.spawn(port, key.config_file()).await {
        Ok(engine) => match ctx
            .hub
            .open_session(&key, member, engine.handle.clone())
            .await
        {
            Ok(()) => JoinOutcome::Hosted(engine),
            Err(err) => {
                warn!(%key, port, error = %err, "could not open session");
                engine.handle.terminate();
                JoinOutcome::Refused
            }
        },
        Err(err) => {
            warn!(%key, port, error = %err, "engine spawn failed");
            ctx.hub.abandon(&key).await;
            JoinOutcome::Refused
        }
    }
}

async fn await_host(
    hub: Arc<SessionHub>,
    key: SessionKey,
    member: String,
    mut spawn: watch::Receiver<SpawnState>,
) -> JoinOutcome {
    let state = match spawn.wait_for(|s| *s != SpawnState::Spawning).await {
        Ok(state) => *state,
        Err(_) => SpawnState::Failed,
    };

    match state {
        SpawnState::Ready(_) => match hub.attach_waiter(&key, member).await {
            Ok(port) => JoinOutcome::Joined { port },
            Err(err) => {
                debug!(%key, error = %err, "session gone before attach");
                JoinOutcome::Refused
            }
        },
        _ => JoinOutcome::Refused,
    }
}

/// Undo a join that completed after its connection went away.
async fn finish_abandoned_join(
    hub: Arc<SessionHub>,
    key: SessionKey,
    member: String,
    join: JoinHandle<JoinOutcome>,
) {
    match join.await {
        Ok(JoinOutcome::Hosted(engine)) => {
            engine.handle.terminate();
            hub.close_session(&key).await;
        }
        Ok(JoinOutcome::Joined { .. }) => hub.depart(&key, &member).await,
        Ok(JoinOutcome::Refused) => {}
        Err(err) => warn!(%key, error = %err, "join task failed"),
    }
}

async fn wait_join(join: &mut Option<JoinHandle<JoinOutcome>>) -> JoinOutcome {
    match join {
        Some(handle) => match handle.await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "join task failed");
                JoinOutcome::Refused
            }
        },
        None => pending().await,
    }
}

async fn recv_link(link: &mut Option<EngineLink>) -> Option<Bytes> {
    match link {
        Some(link) => link.recv().await,
        None => pending().await,
    }
}

async fn wait_exit(exit: &mut Option<oneshot::Receiver<EngineExit>>) -> Option<EngineExit> {
    match exit {
        Some(rx) => rx.await.ok(),
        None => pending().await,
    }
}
