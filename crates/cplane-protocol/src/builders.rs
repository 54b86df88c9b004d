//! Ready-to-send frames.
//!
//! Each helper encodes an envelope and wraps it in its length prefix,
//! so callers can hand the result straight to a socket writer.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use cplane_core::{ControlMessage, EngineHelloAck, Ping, Pong, TransferMessage};

use crate::control_codec::encode_control;
use crate::error::ProtocolError;
use crate::frame::encode_frame;
use crate::transfer_codec::{encode_transfer, encode_write_data};

/// Encode and frame a control envelope.
pub fn control_frame(msg: &ControlMessage) -> Result<Bytes, ProtocolError> {
    let mut payload = Vec::with_capacity(128);
    encode_control(msg, &mut payload)?;
    Ok(encode_frame(&payload)?)
}

/// Encode and frame a file-transfer envelope.
pub fn transfer_frame(msg: &TransferMessage) -> Result<Bytes, ProtocolError> {
    let mut payload = Vec::with_capacity(128);
    encode_transfer(msg, &mut payload)?;
    Ok(encode_frame(&payload)?)
}

/// Framed `WriteData` for one chunk of an upload.
pub fn write_data_frame(request_id: u32, chunk: &[u8]) -> Result<Bytes, ProtocolError> {
    let mut payload = Vec::with_capacity(chunk.len() + 16);
    encode_write_data(request_id, chunk, &mut payload)?;
    Ok(encode_frame(&payload)?)
}

pub fn engine_hello_ack(accepted: bool, server_version: &str) -> Result<Bytes, ProtocolError> {
    control_frame(&ControlMessage::EngineHelloAck(EngineHelloAck {
        accepted,
        server_version: server_version.to_string(),
    }))
}

/// Current Unix time in milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `Ping` stamped with the current time.
pub fn ping_now() -> Result<Bytes, ProtocolError> {
    control_frame(&ControlMessage::Ping(Ping {
        timestamp: unix_millis(),
    }))
}

/// `Pong` echoing a received `Ping`.
pub fn pong(timestamp: u64) -> Result<Bytes, ProtocolError> {
    control_frame(&ControlMessage::Pong(Pong { timestamp }))
}
