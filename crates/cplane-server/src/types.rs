//! Shared types for the control plane server.
//!
//! This module defines:
//! - `EngineId` / `ConnId`: identifiers for engines and sockets
//! - `ServerEvent`: notifications broadcast to observers
//! - `EngineInfo`: snapshot of a live engine connection
//! - channel aliases between connection tasks and the coordinator

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;

use cplane_core::{ConnectionParam, ExecCommandResult, JumpHost, PortCheckEntry, SessionOpenResult};

use crate::coordinator::Command;

/// Identifier of a registered engine (primary key of its persisted record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct EngineId(pub u64);

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for an accepted socket.
///
/// This is intentionally opaque; we just guarantee uniqueness
/// over the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

/// Notifications for observers (UI status, audit, session bookkeeping).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    EngineConnected {
        engine_id: EngineId,
        version: String,
        remote_addr: SocketAddr,
    },
    EngineDisconnected {
        engine_id: EngineId,
    },
    SessionOpenResult {
        session_id: String,
        success: bool,
        error_message: Option<String>,
        connection_id: Option<String>,
    },
    SessionClosed {
        session_id: String,
        reason: String,
    },
    DataConnectionReady {
        session_id: String,
    },
    DataConnectionClosed {
        session_id: String,
    },
}

impl From<&SessionOpenResult> for ServerEvent {
    fn from(r: &SessionOpenResult) -> Self {
        ServerEvent::SessionOpenResult {
            session_id: r.session_id.clone(),
            success: r.success,
            error_message: r.error_message.clone(),
            connection_id: r.connection_id.clone(),
        }
    }
}

/// Snapshot of a live engine connection.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub engine_id: EngineId,
    pub version: String,
    pub remote_addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
    pub last_pong: DateTime<Utc>,
}

/// Successful `open_session` outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOpened {
    pub session_id: String,
    pub success: bool,
    pub connection_id: Option<String>,
}

impl From<SessionOpenResult> for SessionOpened {
    fn from(r: SessionOpenResult) -> Self {
        SessionOpened {
            session_id: r.session_id,
            success: r.success,
            connection_id: r.connection_id,
        }
    }
}

/// Outcome of `exec_command`. A non-zero exit code is not an error;
/// callers inspect `success` / `exit_code` themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub error_message: Option<String>,
}

impl From<ExecCommandResult> for ExecResult {
    fn from(r: ExecCommandResult) -> Self {
        ExecResult {
            success: r.success,
            stdout: r.stdout,
            stderr: r.stderr,
            exit_code: r.exit_code,
            error_message: r.error_message,
        }
    }
}

/// Per-target reachability, in the order the engine reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCheckReport {
    pub entries: Vec<PortCheckEntry>,
}

/// Target and command for a one-shot remote execution.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub host: String,
    pub port: u16,
    pub params: Vec<ConnectionParam>,
    pub command: String,
    pub jump_hosts: Vec<JumpHost>,
}

/// Pre-framed bytes queued for a control socket's writer task.
pub type FrameTx = mpsc::UnboundedSender<Bytes>;
pub type FrameRx = mpsc::UnboundedReceiver<Bytes>;

/// Channel from connection tasks and the public API → coordinator.
pub(crate) type CommandTx = mpsc::UnboundedSender<Command>;
pub(crate) type CommandRx = mpsc::UnboundedReceiver<Command>;
