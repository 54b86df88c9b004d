//! Central coordinator loop.
//!
//! This task owns every mutable table of the control plane:
//! - the engine registry (insertion ordered; the first entry is the
//!   default engine)
//! - the pending-request table, keyed by session id, request id or a
//!   per-call sequence number for data-connection waits
//! - session routing (session id -> engine id)
//! - the data-connection set and parked ("unclaimed") data connections
//!
//! Connection tasks and the public `ControlPlane` API talk to it only
//! through [`Command`]s on one unbounded channel, so no table needs a
//! lock. Replies travel back on `oneshot` channels.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use indexmap::IndexMap;
use rand::distr::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use cplane_core::{
    ControlMessage, ExecCommand, PortCheck, PortCheckTarget, SessionClose, SessionJoin,
    SessionOpen, SessionResize,
};
use cplane_protocol::builders::{control_frame, engine_hello_ack, ping_now, unix_millis};

use crate::config::Config;
use crate::data::{DataConnection, DataLink};
use crate::error::ControlPlaneError;
use crate::policy::pick_default_engine;
use crate::types::{
    CommandRx, ConnId, EngineId, EngineInfo, ExecRequest, ExecResult, FrameTx, PortCheckReport,
    ServerEvent, SessionOpened,
};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, ControlPlaneError>>;

/// Everything the coordinator can be asked to do.
pub(crate) enum Command {
    // --- from connection tasks -------------------------------------
    EngineRegistered {
        conn_id: ConnId,
        engine_id: EngineId,
        version: String,
        remote_addr: SocketAddr,
        frames: FrameTx,
        kill: Arc<Notify>,
    },
    ControlFrame {
        engine_id: EngineId,
        conn_id: ConnId,
        msg: ControlMessage,
    },
    EngineGone {
        engine_id: EngineId,
        conn_id: ConnId,
    },
    DataReady {
        conn: DataConnection,
        link: DataLink,
    },
    DataClosed {
        session_id: String,
        link_id: u64,
    },

    // --- from the public API ---------------------------------------
    OpenSession {
        open: SessionOpen,
        engine_id: Option<EngineId>,
        reply: Reply<SessionOpened>,
    },
    CloseSession {
        session_id: String,
        engine_id: Option<EngineId>,
    },
    JoinSession {
        session_id: String,
        engine_id: Option<EngineId>,
        reply: Reply<DataConnection>,
    },
    Resize {
        resize: SessionResize,
        engine_id: Option<EngineId>,
    },
    Exec {
        request: ExecRequest,
        engine_id: Option<EngineId>,
        reply: Reply<ExecResult>,
    },
    PortCheck {
        targets: Vec<PortCheckTarget>,
        timeout_ms: u32,
        engine_id: Option<EngineId>,
        reply: Reply<PortCheckReport>,
    },
    WaitForData {
        session_id: String,
        reply: Reply<DataConnection>,
    },
    HasEngine {
        reply: oneshot::Sender<bool>,
    },
    EngineInfo {
        engine_id: EngineId,
        reply: oneshot::Sender<Option<EngineInfo>>,
    },
    ListEngines {
        reply: oneshot::Sender<Vec<EngineInfo>>,
    },
    SessionEngine {
        session_id: String,
        reply: oneshot::Sender<Option<EngineId>>,
    },
    Disconnect {
        engine_id: EngineId,
        reply: oneshot::Sender<bool>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },

    // --- internal --------------------------------------------------
    Expire {
        key: PendingKey,
        seq: u64,
    },
}

/// Correlation key of a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum PendingKey {
    /// `open_session`, keyed by session id.
    Session(String),
    /// `exec_command` / `port_check`, keyed by generated request id.
    Request(String),
    /// `join_session`; several joins for one session may be in flight.
    Join(u64),
    /// `wait_for_data_connection`.
    DataWait(u64),
}

enum Waiter {
    SessionOpen(Reply<SessionOpened>),
    Exec(Reply<ExecResult>),
    PortCheck(Reply<PortCheckReport>),
    Data(Reply<DataConnection>),
}

impl Waiter {
    fn reject(self, err: ControlPlaneError) {
        // A dropped receiver means the caller gave up; nothing to do.
        match self {
            Waiter::SessionOpen(tx) => {
                let _ = tx.send(Err(err));
            }
            Waiter::Exec(tx) => {
                let _ = tx.send(Err(err));
            }
            Waiter::PortCheck(tx) => {
                let _ = tx.send(Err(err));
            }
            Waiter::Data(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

struct PendingRequest {
    seq: u64,
    /// Engine the request was sent to, if any.
    engine_id: Option<EngineId>,
    /// Session whose data connection this request is waiting for.
    data_session: Option<String>,
    waiter: Waiter,
    timer: JoinHandle<()>,
}

struct EngineConn {
    conn_id: ConnId,
    info: EngineInfo,
    frames: FrameTx,
    kill: Arc<Notify>,
}

struct Parked {
    since: Instant,
    conn: DataConnection,
}

pub(crate) struct Coordinator {
    config: Config,
    commands: WeakUnboundedSender<Command>,
    events: broadcast::Sender<ServerEvent>,

    engines: IndexMap<EngineId, EngineConn>,
    /// Every live control socket, including ones whose engine entry was
    /// replaced by a newer connection.
    connections: HashMap<ConnId, Arc<Notify>>,
    pending: IndexMap<PendingKey, PendingRequest>,
    routes: HashMap<String, EngineId>,
    data_links: HashMap<String, Vec<DataLink>>,
    unclaimed: VecDeque<Parked>,
    next_seq: u64,
}

impl Coordinator {
    pub fn new(
        config: Config,
        commands: WeakUnboundedSender<Command>,
        events: broadcast::Sender<ServerEvent>,
    ) -> Self {
        Coordinator {
            config,
            commands,
            events,
            engines: IndexMap::new(),
            connections: HashMap::new(),
            pending: IndexMap::new(),
            routes: HashMap::new(),
            data_links: HashMap::new(),
            unclaimed: VecDeque::new(),
            next_seq: 1,
        }
    }

    /// Run until `Shutdown` arrives or every command sender is gone.
    pub async fn run(mut self, mut commands: CommandRx) {
        let period = self.config.heartbeat_interval.max(Duration::from_millis(1));
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle(cmd),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                _ = heartbeat.tick() => self.heartbeat(),
            }
        }

        debug!("coordinator loop finished");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::EngineRegistered {
                conn_id,
                engine_id,
                version,
                remote_addr,
                frames,
                kill,
            } => self.on_engine_registered(conn_id, engine_id, version, remote_addr, frames, kill),
            Command::ControlFrame {
                engine_id,
                conn_id,
                msg,
            } => self.on_control_message(engine_id, conn_id, msg),
            Command::EngineGone { engine_id, conn_id } => {
                self.connections.remove(&conn_id);
                let current = self.engines.get(&engine_id).map(|e| e.conn_id);
                if current == Some(conn_id) {
                    self.remove_engine(engine_id);
                } else {
                    debug!(%engine_id, "superseded control connection closed");
                }
            }
            Command::DataReady { conn, link } => self.on_data_ready(conn, link),
            Command::DataClosed {
                session_id,
                link_id,
            } => self.on_data_closed(session_id, link_id),

            Command::OpenSession {
                open,
                engine_id,
                reply,
            } => self.open_session(open, engine_id, reply),
            Command::CloseSession {
                session_id,
                engine_id,
            } => self.close_session(session_id, engine_id),
            Command::JoinSession {
                session_id,
                engine_id,
                reply,
            } => self.join_session(session_id, engine_id, reply),
            Command::Resize { resize, engine_id } => {
                match self.resolve_session_engine(&resize.session_id, engine_id) {
                    Ok(target) => {
                        self.send_control(target, &ControlMessage::SessionResize(resize));
                    }
                    Err(e) => debug!(session_id = %resize.session_id, error = %e, "resize dropped"),
                }
            }
            Command::Exec {
                request,
                engine_id,
                reply,
            } => self.exec_command(request, engine_id, reply),
            Command::PortCheck {
                targets,
                timeout_ms,
                engine_id,
                reply,
            } => self.port_check(targets, timeout_ms, engine_id, reply),
            Command::WaitForData { session_id, reply } => {
                self.wait_for_data_connection(session_id, reply)
            }
            Command::HasEngine { reply } => {
                let _ = reply.send(!self.engines.is_empty());
            }
            Command::EngineInfo { engine_id, reply } => {
                let _ = reply.send(self.engines.get(&engine_id).map(|e| e.info.clone()));
            }
            Command::ListEngines { reply } => {
                let _ = reply.send(self.engines.values().map(|e| e.info.clone()).collect());
            }
            Command::SessionEngine { session_id, reply } => {
                let _ = reply.send(self.routes.get(&session_id).copied());
            }
            Command::Disconnect { engine_id, reply } => {
                let found = match self.engines.get(&engine_id) {
                    Some(engine) => {
                        engine.kill.notify_one();
                        true
                    }
                    None => false,
                };
                if found {
                    info!(%engine_id, "disconnecting engine");
                    self.remove_engine(engine_id);
                }
                let _ = reply.send(found);
            }
            Command::Expire { key, seq } => self.expire(key, seq),
            Command::Shutdown { reply } => {
                // Only reachable if the loop did not intercept it.
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    // --- engine lifecycle ----------------------------------------------

    fn on_engine_registered(
        &mut self,
        conn_id: ConnId,
        engine_id: EngineId,
        version: String,
        remote_addr: SocketAddr,
        frames: FrameTx,
        kill: Arc<Notify>,
    ) {
        // The ack is the first frame the engine sees, after it is routable.
        match engine_hello_ack(true, &self.config.server_version) {
            Ok(ack) => {
                let _ = frames.send(ack);
            }
            Err(e) => warn!(error = %e, "failed to encode EngineHelloAck"),
        }

        let now = Utc::now();
        let info = EngineInfo {
            engine_id,
            version: version.clone(),
            remote_addr,
            connected_at: now,
            last_pong: now,
        };

        self.connections.insert(conn_id, kill.clone());
        if let Some(previous) = self.engines.insert(
            engine_id,
            EngineConn {
                conn_id,
                info,
                frames,
                kill,
            },
        ) {
            debug!(%engine_id, old = previous.conn_id.0, "engine entry replaced by reconnect");
        }

        self.emit(ServerEvent::EngineConnected {
            engine_id,
            version,
            remote_addr,
        });
    }

    fn remove_engine(&mut self, engine_id: EngineId) {
        if self.engines.shift_remove(&engine_id).is_none() {
            return;
        }
        info!(%engine_id, "engine disconnected");

        let orphaned: Vec<String> = self
            .routes
            .iter()
            .filter(|(_, owner)| **owner == engine_id)
            .map(|(sid, _)| sid.clone())
            .collect();
        for session_id in orphaned {
            self.routes.remove(&session_id);
            self.emit(ServerEvent::SessionClosed {
                session_id,
                reason: "engine disconnected".to_string(),
            });
        }

        self.emit(ServerEvent::EngineDisconnected { engine_id });

        if self.config.fail_fast_on_disconnect {
            let keys: Vec<PendingKey> = self
                .pending
                .iter()
                .filter(|(_, p)| p.engine_id == Some(engine_id))
                .map(|(k, _)| k.clone())
                .collect();
            for key in keys {
                if let Some(p) = self.take_pending(&key) {
                    p.waiter
                        .reject(ControlPlaneError::EngineDisconnected(engine_id));
                }
            }
        }
    }

    fn on_control_message(&mut self, engine_id: EngineId, conn_id: ConnId, msg: ControlMessage) {
        match msg {
            ControlMessage::Pong(_) => {
                if let Some(engine) = self.engines.get_mut(&engine_id) {
                    if engine.conn_id == conn_id {
                        engine.info.last_pong = Utc::now();
                    }
                }
            }
            ControlMessage::SessionOpenResult(result) => {
                self.emit(ServerEvent::from(&result));

                let key = PendingKey::Session(result.session_id.clone());
                if !matches!(
                    self.pending.get(&key).map(|p| &p.waiter),
                    Some(Waiter::SessionOpen(_))
                ) {
                    debug!(session_id = %result.session_id, "SessionOpenResult without pending request");
                    return;
                }
                let Some(pending) = self.take_pending(&key) else {
                    return;
                };
                let Waiter::SessionOpen(reply) = pending.waiter else {
                    return;
                };

                if result.success {
                    let _ = reply.send(Ok(SessionOpened::from(result)));
                } else {
                    if self.routes.get(&result.session_id) == Some(&engine_id) {
                        self.routes.remove(&result.session_id);
                    }
                    let message = result
                        .error_message
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| "Session open failed".to_string());
                    let _ = reply.send(Err(ControlPlaneError::SessionOpenFailed(message)));
                }
            }
            ControlMessage::SessionClosed(closed) => {
                info!(session_id = %closed.session_id, reason = %closed.reason, "session closed by engine");
                self.emit(ServerEvent::SessionClosed {
                    session_id: closed.session_id,
                    reason: closed.reason,
                });
            }
            ControlMessage::ExecCommandResult(result) => {
                let key = PendingKey::Request(result.request_id.clone());
                if !matches!(self.pending.get(&key).map(|p| &p.waiter), Some(Waiter::Exec(_))) {
                    debug!(request_id = %result.request_id, "late or unknown ExecCommandResult");
                    return;
                }
                if let Some(PendingRequest {
                    waiter: Waiter::Exec(reply),
                    ..
                }) = self.take_pending(&key)
                {
                    let _ = reply.send(Ok(ExecResult::from(result)));
                }
            }
            ControlMessage::PortCheckResult(result) => {
                let key = PendingKey::Request(result.request_id.clone());
                if !matches!(
                    self.pending.get(&key).map(|p| &p.waiter),
                    Some(Waiter::PortCheck(_))
                ) {
                    debug!(request_id = %result.request_id, "late or unknown PortCheckResult");
                    return;
                }
                if let Some(PendingRequest {
                    waiter: Waiter::PortCheck(reply),
                    ..
                }) = self.take_pending(&key)
                {
                    let _ = reply.send(Ok(PortCheckReport {
                        entries: result.results,
                    }));
                }
            }
            other => {
                warn!(%engine_id, kind = other.kind(), "unhandled control message");
            }
        }
    }

    // --- data connections ----------------------------------------------

    fn on_data_ready(&mut self, conn: DataConnection, link: DataLink) {
        let session_id = conn.session_id().to_string();
        info!(%session_id, peer = %conn.peer_addr(), residual = conn.residual().len(), "data connection ready");

        self.data_links
            .entry(session_id.clone())
            .or_default()
            .push(link);

        let conn = match self.hand_off(conn, true) {
            Ok(()) => return,
            Err(conn) => conn,
        };

        self.emit(ServerEvent::DataConnectionReady {
            session_id: session_id.clone(),
        });

        if let Err(conn) = self.hand_off(conn, false) {
            debug!(%session_id, "no waiter; parking data connection");
            self.unclaimed.push_back(Parked {
                since: Instant::now(),
                conn,
            });
        }
    }

    /// Give `conn` to the oldest matching join (or plain wait) waiter.
    /// Returns the connection back when nobody takes it.
    fn hand_off(&mut self, mut conn: DataConnection, join: bool) -> Result<(), DataConnection> {
        loop {
            let key = self
                .pending
                .iter()
                .find(|(k, p)| {
                    let kind_matches = if join {
                        matches!(k, PendingKey::Join(_))
                    } else {
                        matches!(k, PendingKey::DataWait(_))
                    };
                    kind_matches && p.data_session.as_deref() == Some(conn.session_id())
                })
                .map(|(k, _)| k.clone());

            let Some(key) = key else {
                return Err(conn);
            };
            let Some(pending) = self.take_pending(&key) else {
                return Err(conn);
            };

            if let Waiter::Data(reply) = pending.waiter {
                match reply.send(Ok(conn)) {
                    Ok(()) => return Ok(()),
                    // Caller stopped waiting; try the next one.
                    Err(Ok(back)) => conn = back,
                    Err(Err(_)) => return Ok(()),
                }
            }
        }
    }

    fn on_data_closed(&mut self, session_id: String, link_id: u64) {
        let Some(links) = self.data_links.get_mut(&session_id) else {
            return;
        };
        let before = links.len();
        links.retain(|l| l.link_id != link_id);
        if links.len() == before {
            return;
        }
        if links.is_empty() {
            self.data_links.remove(&session_id);
        }
        debug!(%session_id, "data connection closed");
        self.emit(ServerEvent::DataConnectionClosed { session_id });
    }

    // --- public operations ---------------------------------------------

    fn open_session(
        &mut self,
        open: SessionOpen,
        engine_id: Option<EngineId>,
        reply: Reply<SessionOpened>,
    ) {
        let target = match self.resolve_engine(engine_id) {
            Ok(id) => id,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let key = PendingKey::Session(open.session_id.clone());
        if self.pending.contains_key(&key) {
            let _ = reply.send(Err(ControlPlaneError::AlreadyPending(open.session_id)));
            return;
        }

        let frame = match control_frame(&ControlMessage::SessionOpen(open.clone())) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };

        debug!(session_id = %open.session_id, session_type = %open.session_type, engine_id = %target, "opening session");
        self.routes.insert(open.session_id, target);
        self.insert_pending(
            key,
            Some(target),
            None,
            Waiter::SessionOpen(reply),
            self.config.request_timeout,
        );
        self.send_frame(target, frame);
    }

    fn close_session(&mut self, session_id: String, engine_id: Option<EngineId>) {
        match self.resolve_session_engine(&session_id, engine_id) {
            Ok(target) => {
                self.send_control(
                    target,
                    &ControlMessage::SessionClose(SessionClose {
                        session_id: session_id.clone(),
                    }),
                );
                self.routes.remove(&session_id);
            }
            Err(e) => debug!(%session_id, error = %e, "close dropped"),
        }
    }

    fn join_session(
        &mut self,
        session_id: String,
        engine_id: Option<EngineId>,
        reply: Reply<DataConnection>,
    ) {
        let target = match self.resolve_session_engine(&session_id, engine_id) {
            Ok(id) => id,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let key = PendingKey::Join(self.peek_seq());
        self.insert_pending(
            key,
            Some(target),
            Some(session_id.clone()),
            Waiter::Data(reply),
            self.config.data_connection_timeout,
        );
        self.send_control(target, &ControlMessage::SessionJoin(SessionJoin { session_id }));
    }

    fn exec_command(
        &mut self,
        request: ExecRequest,
        engine_id: Option<EngineId>,
        reply: Reply<ExecResult>,
    ) {
        let target = match self.resolve_engine(engine_id) {
            Ok(id) => id,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let request_id = new_request_id("exec");
        let msg = ControlMessage::ExecCommand(ExecCommand {
            request_id: request_id.clone(),
            host: request.host,
            port: request.port,
            params: request.params,
            command: request.command,
            jump_hosts: request.jump_hosts,
        });
        let frame = match control_frame(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };

        debug!(%request_id, engine_id = %target, "exec command");
        self.insert_pending(
            PendingKey::Request(request_id),
            Some(target),
            None,
            Waiter::Exec(reply),
            self.config.request_timeout,
        );
        self.send_frame(target, frame);
    }

    fn port_check(
        &mut self,
        targets: Vec<PortCheckTarget>,
        timeout_ms: u32,
        engine_id: Option<EngineId>,
        reply: Reply<PortCheckReport>,
    ) {
        let target = match self.resolve_engine(engine_id) {
            Ok(id) => id,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let request_id = new_request_id("portcheck");
        let msg = ControlMessage::PortCheck(PortCheck {
            request_id: request_id.clone(),
            targets,
            timeout_ms,
        });
        let frame = match control_frame(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };

        self.insert_pending(
            PendingKey::Request(request_id),
            Some(target),
            None,
            Waiter::PortCheck(reply),
            self.config.request_timeout,
        );
        self.send_frame(target, frame);
    }

    fn wait_for_data_connection(&mut self, session_id: String, reply: Reply<DataConnection>) {
        self.drop_dead_parked();
        let parked = self
            .unclaimed
            .iter()
            .position(|p| p.conn.session_id() == session_id);
        if let Some(idx) = parked {
            if let Some(parked) = self.unclaimed.remove(idx) {
                if let Err(Ok(conn)) = reply.send(Ok(parked.conn)) {
                    self.unclaimed.insert(
                        idx,
                        Parked {
                            since: parked.since,
                            conn,
                        },
                    );
                }
                return;
            }
        }

        let key = PendingKey::DataWait(self.peek_seq());
        self.insert_pending(
            key,
            None,
            Some(session_id),
            Waiter::Data(reply),
            self.config.data_connection_timeout,
        );
    }

    // --- timers ----------------------------------------------------------

    fn heartbeat(&mut self) {
        if !self.engines.is_empty() {
            match ping_now() {
                Ok(ping) => {
                    for engine in self.engines.values() {
                        let _ = engine.frames.send(ping.clone());
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode Ping"),
            }
        }

        let max_age = self.config.data_connection_timeout;
        let before = self.unclaimed.len();
        self.unclaimed.retain(|p| p.since.elapsed() < max_age);
        let purged = before - self.unclaimed.len();
        if purged > 0 {
            debug!(purged, "dropped stale unclaimed data connections");
        }
        self.drop_dead_parked();
    }

    /// Drop parked connections whose engine side already closed. Dropping
    /// them reports `DataClosed` back to this loop.
    fn drop_dead_parked(&mut self) {
        let links = &self.data_links;
        self.unclaimed.retain(|p| {
            let alive = links
                .get(p.conn.session_id())
                .and_then(|ls| ls.iter().find(|l| l.link_id == p.conn.link_id()))
                .map(|l| !l.peer_closed())
                .unwrap_or(false);
            if !alive {
                debug!(session_id = %p.conn.session_id(), "dropping closed parked data connection");
            }
            alive
        });
    }

    fn expire(&mut self, key: PendingKey, seq: u64) {
        if self.pending.get(&key).map(|p| p.seq) != Some(seq) {
            return;
        }
        let Some(pending) = self.take_pending(&key) else {
            return;
        };

        warn!(?key, "pending request timed out");
        match pending.waiter {
            Waiter::Data(reply) => {
                let _ = reply.send(Err(ControlPlaneError::DataConnectionTimeout));
            }
            waiter => {
                if let (PendingKey::Session(session_id), Some(engine_id)) = (&key, pending.engine_id)
                {
                    if self.routes.get(session_id) == Some(&engine_id) {
                        self.routes.remove(session_id);
                    }
                }
                waiter.reject(ControlPlaneError::Timeout);
            }
        }
    }

    fn shutdown(&mut self) {
        let keys: Vec<PendingKey> = self.pending.keys().cloned().collect();
        for key in keys {
            if let Some(p) = self.take_pending(&key) {
                p.waiter.reject(ControlPlaneError::ServerStopping);
            }
        }

        for kill in self.connections.values() {
            kill.notify_one();
        }
        for links in self.data_links.values() {
            for link in links {
                link.shutdown();
            }
        }

        self.connections.clear();
        self.engines.clear();
        self.routes.clear();
        self.data_links.clear();
        self.unclaimed.clear();

        info!("control plane stopped");
    }

    // --- helpers -----------------------------------------------------------

    fn resolve_engine(&self, explicit: Option<EngineId>) -> Result<EngineId, ControlPlaneError> {
        match explicit {
            Some(id) if self.engines.contains_key(&id) => Ok(id),
            Some(id) => Err(ControlPlaneError::EngineNotConnected(id)),
            None => pick_default_engine(&self.engines).ok_or(ControlPlaneError::NoEngine),
        }
    }

    fn resolve_session_engine(
        &self,
        session_id: &str,
        explicit: Option<EngineId>,
    ) -> Result<EngineId, ControlPlaneError> {
        if explicit.is_some() {
            return self.resolve_engine(explicit);
        }
        match self.routes.get(session_id) {
            Some(id) if self.engines.contains_key(id) => Ok(*id),
            Some(_) => Err(ControlPlaneError::NoEngine),
            None => self.resolve_engine(None),
        }
    }

    fn send_control(&self, engine_id: EngineId, msg: &ControlMessage) {
        match control_frame(msg) {
            Ok(frame) => self.send_frame(engine_id, frame),
            Err(e) => warn!(kind = msg.kind(), error = %e, "failed to encode control message"),
        }
    }

    fn send_frame(&self, engine_id: EngineId, frame: Bytes) {
        if let Some(engine) = self.engines.get(&engine_id) {
            if engine.frames.send(frame).is_err() {
                debug!(%engine_id, "engine writer already gone");
            }
        }
    }

    fn emit(&self, event: ServerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn peek_seq(&self) -> u64 {
        self.next_seq
    }

    fn insert_pending(
        &mut self,
        key: PendingKey,
        engine_id: Option<EngineId>,
        data_session: Option<String>,
        waiter: Waiter,
        timeout: Duration,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let commands = self.commands.clone();
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            time::sleep(timeout).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::Expire {
                    key: timer_key,
                    seq,
                });
            }
        });

        self.pending.insert(
            key,
            PendingRequest {
                seq,
                engine_id,
                data_session,
                waiter,
                timer,
            },
        );
    }

    fn take_pending(&mut self, key: &PendingKey) -> Option<PendingRequest> {
        let pending = self.pending.shift_remove(key)?;
        pending.timer.abort();
        Some(pending)
    }
}

/// `<prefix>-<unix millis>-<8 random alphanumerics>`.
fn new_request_id(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{}-{}-{}", prefix, unix_millis(), suffix.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_prefixed_and_unique() {
        let a = new_request_id("exec");
        let b = new_request_id("exec");
        assert!(a.starts_with("exec-"));
        assert_eq!(a.rsplit('-').next().map(str::len), Some(8));
        assert_ne!(a, b);
    }
}
