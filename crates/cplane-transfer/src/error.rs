use std::io;

use cplane_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// The engine answered with `Error { message }`.
    #[error("{0}")]
    Remote(String),

    /// The socket closed (or `close()` was called) before a reply.
    #[error("file-transfer connection closed")]
    ConnectionClosed,

    /// The engine answered with a reply of the wrong kind.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(&'static str),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] io::Error),
}
