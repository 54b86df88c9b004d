//! Control-plane message types.
//!
//! These are **transport-agnostic** logical messages exchanged over an
//! engine's control connection (plus the one-off `ConnectionReady`
//! handshake on data connections):
//! - coordinator → engine: `EngineHelloAck`, `Ping`, `SessionOpen`,
//!   `SessionClose`, `SessionJoin`, `SessionResize`, `ExecCommand`,
//!   `PortCheck`.
//! - engine → coordinator: `EngineHello`, `Pong`, `SessionOpenResult`,
//!   `SessionClosed`, `ConnectionReady`, `ExecCommandResult`,
//!   `PortCheckResult`.
//!
//! `Ping` / `Pong` flow both ways.
//!
//! Note: the binary envelope encoding lives in the `cplane-protocol`
//! crate; this module is purely logical.

use crate::session_type::SessionType;

/// One control envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    EngineHello(EngineHello),
    EngineHelloAck(EngineHelloAck),
    Ping(Ping),
    Pong(Pong),
    ConnectionReady(ConnectionReady),
    SessionOpen(SessionOpen),
    SessionOpenResult(SessionOpenResult),
    SessionClose(SessionClose),
    SessionClosed(SessionClosed),
    SessionJoin(SessionJoin),
    SessionResize(SessionResize),
    ExecCommand(ExecCommand),
    ExecCommandResult(ExecCommandResult),
    PortCheck(PortCheck),
    PortCheckResult(PortCheckResult),
}

impl ControlMessage {
    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::EngineHello(_) => "EngineHello",
            ControlMessage::EngineHelloAck(_) => "EngineHelloAck",
            ControlMessage::Ping(_) => "Ping",
            ControlMessage::Pong(_) => "Pong",
            ControlMessage::ConnectionReady(_) => "ConnectionReady",
            ControlMessage::SessionOpen(_) => "SessionOpen",
            ControlMessage::SessionOpenResult(_) => "SessionOpenResult",
            ControlMessage::SessionClose(_) => "SessionClose",
            ControlMessage::SessionClosed(_) => "SessionClosed",
            ControlMessage::SessionJoin(_) => "SessionJoin",
            ControlMessage::SessionResize(_) => "SessionResize",
            ControlMessage::ExecCommand(_) => "ExecCommand",
            ControlMessage::ExecCommandResult(_) => "ExecCommandResult",
            ControlMessage::PortCheck(_) => "PortCheck",
            ControlMessage::PortCheckResult(_) => "PortCheckResult",
        }
    }
}

/// First message on a control connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineHello {
    /// Engine build version, informational only.
    pub version: String,

    /// Secret issued when the engine was registered. `None` means the
    /// engine was started without one and will be refused.
    pub registration_token: Option<String>,
}

/// Coordinator's answer to `EngineHello`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineHelloAck {
    pub accepted: bool,
    pub server_version: String,
}

/// Heartbeat probe. `timestamp` is Unix time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub timestamp: u64,
}

/// Heartbeat answer; echoes the probe's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    pub timestamp: u64,
}

/// First (and only framed) message on a data connection.
///
/// Everything after this frame on the same socket is raw session bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReady {
    pub session_id: String,
}

/// A `key = value` connection parameter (credentials, display size,
/// terminal type, ...). Interpretation is up to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParam {
    pub key: String,
    pub value: String,
}

impl ConnectionParam {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        ConnectionParam {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Intermediate SSH host the engine must hop through to reach a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpHost {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
}

impl JumpHost {
    /// Default SSH port used when a jump host does not specify one.
    pub const DEFAULT_PORT: u16 = 22;

    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        JumpHost {
            host: host.into(),
            port: Self::DEFAULT_PORT,
            username: username.into(),
            password: None,
            private_key: None,
            passphrase: None,
        }
    }
}

/// Ask an engine to open a remote session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOpen {
    pub session_id: String,
    pub session_type: SessionType,
    pub host: String,
    pub port: u16,
    pub params: Vec<ConnectionParam>,
    pub jump_hosts: Vec<JumpHost>,
}

/// Engine's verdict on a `SessionOpen`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOpenResult {
    pub session_id: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub connection_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClose {
    pub session_id: String,
}

/// Engine-side notification that a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClosed {
    pub session_id: String,
    pub reason: String,
}

/// Ask the engine to open one more data connection for an existing
/// session (e.g. a spectator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionJoin {
    pub session_id: String,
}

/// Terminal / display resize for a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResize {
    pub session_id: String,
    pub cols: u16,
    pub rows: u16,
}

/// One-shot command execution on a remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCommand {
    pub request_id: String,
    pub host: String,
    pub port: u16,
    pub params: Vec<ConnectionParam>,
    pub command: String,
    pub jump_hosts: Vec<JumpHost>,
}

/// Outcome of an `ExecCommand`.
///
/// A non-zero `exit_code` is not a failure at this layer; `success`
/// only reports whether the engine managed to run the command at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCommandResult {
    pub request_id: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCheckTarget {
    pub id: String,
    pub host: String,
    pub port: u16,
}

/// Reachability probe for a batch of `host:port` targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCheck {
    pub request_id: String,
    pub targets: Vec<PortCheckTarget>,

    /// Per-target connect timeout the engine should use.
    pub timeout_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCheckEntry {
    pub id: String,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCheckResult {
    pub request_id: String,
    pub results: Vec<PortCheckEntry>,
}
