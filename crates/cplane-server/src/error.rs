//! Errors surfaced to callers of the control plane API.

use std::io;

use cplane_protocol::ProtocolError;
use thiserror::Error;

use crate::types::EngineId;

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// No engine is connected (or the session's engine is gone).
    #[error("no engine connected")]
    NoEngine,

    /// An explicit engine id was given but that engine is not connected.
    #[error("engine {0} is not connected")]
    EngineNotConnected(EngineId),

    /// The engine serving this request dropped its control connection.
    #[error("engine {0} disconnected")]
    EngineDisconnected(EngineId),

    /// No reply within the request window.
    #[error("request timeout")]
    Timeout,

    /// No matching data connection within the data-connection window.
    #[error("data connection timeout")]
    DataConnectionTimeout,

    /// The engine reported `SessionOpenResult { success: false }`.
    #[error("{0}")]
    SessionOpenFailed(String),

    /// A request with the same correlation key is still outstanding.
    #[error("a request for {0} is already pending")]
    AlreadyPending(String),

    #[error("control plane server stopping")]
    ServerStopping,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] io::Error),
}
