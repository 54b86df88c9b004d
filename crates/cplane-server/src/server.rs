//! TCP listener and the public control plane handle.
//!
//! [`ControlPlane::start`]:
//! - binds the configured address/port,
//! - spawns the coordinator task that owns all state,
//! - spawns the accept loop, which runs one connection task per socket.
//!
//! Every public method is a thin wrapper that sends a `Command` to the
//! coordinator and, where a reply is expected, awaits it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use cplane_core::{PortCheckTarget, SessionOpen, SessionResize};

use crate::config::Config;
use crate::connection::run_connection;
use crate::coordinator::{Command, Coordinator, Reply};
use crate::data::DataConnection;
use crate::error::ControlPlaneError;
use crate::registry::EngineRegistry;
use crate::types::{
    CommandRx, CommandTx, EngineId, EngineInfo, ExecRequest, ExecResult, PortCheckReport,
    ServerEvent, SessionOpened,
};

/// Buffered events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 256;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Handle on a running control plane server.
pub struct ControlPlane {
    commands: CommandTx,
    events: broadcast::Sender<ServerEvent>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl ControlPlane {
    /// Bind the listener and start serving.
    pub async fn start(
        config: Config,
        registry: Arc<dyn EngineRegistry>,
    ) -> Result<Self, ControlPlaneError> {
        let addr = config.socket_addr_string();
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "control plane listening");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (commands, command_rx): (CommandTx, CommandRx) = mpsc::unbounded_channel();

        let server_version = config.server_version.clone();
        let coordinator = Coordinator::new(config, commands.downgrade(), events.clone());
        tokio::spawn(coordinator.run(command_rx));

        let accept_task = tokio::spawn(accept_loop(
            listener,
            commands.clone(),
            registry,
            server_version,
        ));

        Ok(ControlPlane {
            commands,
            events,
            local_addr,
            accept_task,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribe to server events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Ask an engine to open a remote session and wait for its result.
    ///
    /// The session is routed to the chosen engine before `SessionOpen`
    /// is sent; the route is rolled back on failure or timeout.
    pub async fn open_session(
        &self,
        open: SessionOpen,
        engine_id: Option<EngineId>,
    ) -> Result<SessionOpened, ControlPlaneError> {
        self.request(|reply| Command::OpenSession {
            open,
            engine_id,
            reply,
        })
        .await
    }

    /// Tell the owning engine to close a session. Not acknowledged.
    pub fn close_session(&self, session_id: &str, engine_id: Option<EngineId>) {
        self.post(Command::CloseSession {
            session_id: session_id.to_string(),
            engine_id,
        });
    }

    /// Ask the engine for another data connection to an existing
    /// session and wait for it to arrive.
    pub async fn join_session(
        &self,
        session_id: &str,
        engine_id: Option<EngineId>,
    ) -> Result<DataConnection, ControlPlaneError> {
        let session_id = session_id.to_string();
        self.request(|reply| Command::JoinSession {
            session_id,
            engine_id,
            reply,
        })
        .await
    }

    /// Forward a terminal resize. Not acknowledged.
    pub fn send_session_resize(
        &self,
        session_id: &str,
        cols: u16,
        rows: u16,
        engine_id: Option<EngineId>,
    ) {
        self.post(Command::Resize {
            resize: SessionResize {
                session_id: session_id.to_string(),
                cols,
                rows,
            },
            engine_id,
        });
    }

    /// Run a one-shot command through an engine.
    pub async fn exec_command(
        &self,
        request: ExecRequest,
        engine_id: Option<EngineId>,
    ) -> Result<ExecResult, ControlPlaneError> {
        self.request(|reply| Command::Exec {
            request,
            engine_id,
            reply,
        })
        .await
    }

    /// Check reachability of `targets` from an engine. `timeout_ms` is
    /// the per-target budget forwarded to the engine.
    pub async fn port_check(
        &self,
        targets: Vec<PortCheckTarget>,
        timeout_ms: u32,
        engine_id: Option<EngineId>,
    ) -> Result<PortCheckReport, ControlPlaneError> {
        self.request(|reply| Command::PortCheck {
            targets,
            timeout_ms,
            engine_id,
            reply,
        })
        .await
    }

    /// Wait for the next data connection of `session_id` that no join
    /// claimed, including one that already arrived.
    pub async fn wait_for_data_connection(
        &self,
        session_id: &str,
    ) -> Result<DataConnection, ControlPlaneError> {
        let session_id = session_id.to_string();
        self.request(|reply| Command::WaitForData { session_id, reply })
            .await
    }

    pub async fn has_engine(&self) -> bool {
        self.query(|reply| Command::HasEngine { reply })
            .await
            .unwrap_or(false)
    }

    pub async fn engine_info(&self, engine_id: EngineId) -> Option<EngineInfo> {
        self.query(|reply| Command::EngineInfo { engine_id, reply })
            .await
            .flatten()
    }

    /// All connected engines, default engine first.
    pub async fn engines(&self) -> Vec<EngineInfo> {
        self.query(|reply| Command::ListEngines { reply })
            .await
            .unwrap_or_default()
    }

    /// Engine a session is currently routed to.
    pub async fn session_engine(&self, session_id: &str) -> Option<EngineId> {
        let session_id = session_id.to_string();
        self.query(|reply| Command::SessionEngine { session_id, reply })
            .await
            .flatten()
    }

    /// Drop an engine's control connection. Returns `false` if it was
    /// not connected.
    pub async fn disconnect_engine(&self, engine_id: EngineId) -> bool {
        self.query(|reply| Command::Disconnect { engine_id, reply })
            .await
            .unwrap_or(false)
    }

    /// Stop accepting, reject everything outstanding with
    /// `ServerStopping` and close every engine and data socket.
    /// Calls after the first are no-ops.
    pub async fn stop(&self) {
        self.accept_task.abort();

        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply: tx }).is_ok() {
            let _ = rx.await;
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ControlPlaneError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| ControlPlaneError::ServerStopping)?;
        rx.await.map_err(|_| ControlPlaneError::ServerStopping)?
    }

    async fn query<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(build(tx)).ok()?;
        rx.await.ok()
    }

    fn post(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            debug!("control plane stopped; command dropped");
        }
    }
}

impl Drop for ControlPlane {
    fn drop(&mut self) {
        self.accept_task.abort();
        // No-op after `stop()`: the coordinator has already exited.
        let (tx, _rx) = oneshot::channel();
        let _ = self.commands.send(Command::Shutdown { reply: tx });
    }
}

async fn accept_loop(
    listener: TcpListener,
    commands: CommandTx,
    registry: Arc<dyn EngineRegistry>,
    server_version: String,
) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        debug!(%peer_addr, "accepted connection");

        let commands = commands.clone();
        let registry = registry.clone();
        let server_version = server_version.clone();
        tokio::spawn(async move {
            if let Err(e) =
                run_connection(stream, peer_addr, commands, registry, server_version).await
            {
                debug!(%peer_addr, error = %e, "connection ended with error");
            }
        });
    }
}
