use thiserror::Error;

use crate::frame::FrameError;
use crate::wire_types::PROTOCOL_VERSION;

/// Errors that can arise when encoding/decoding an envelope.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Buffer too short for the expected fields.
    #[error("buffer truncated")]
    Truncated,

    /// Unknown or unsupported message type.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Unsupported or mismatched envelope version.
    #[error("protocol version mismatch: got {0}, expected {}", PROTOCOL_VERSION)]
    VersionMismatch(u8),

    /// A string field is not valid UTF-8.
    #[error("invalid UTF-8 in field: {0}")]
    InvalidUtf8(&'static str),

    /// Out-of-range value or other semantic issue.
    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    /// Encoded envelope does not fit in a frame.
    #[error(transparent)]
    Frame(#[from] FrameError),
}
