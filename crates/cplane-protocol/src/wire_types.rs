//! Low-level wire types and constants.
//!
//! This module defines:
//! - Message type IDs for control and file-transfer envelopes.
//! - Protocol versioning.
//! - Small helpers for dealing with fixed/variable-length fields.
//!
//! The actual encode/decode logic lives in `control_codec` and
//! `transfer_codec`.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Current envelope version.
///
/// Bumped if the envelope header or any field layout changes
/// incompatibly.
pub const PROTOCOL_VERSION: u8 = 1;

/// `[0] msg_type, [1] version, [2..4] reserved`.
pub const ENVELOPE_HEADER_SIZE: usize = 4;

/// Control envelope types.
///
/// These IDs are used in the first byte of each control payload.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WireControlType {
    EngineHello = 1,
    EngineHelloAck = 2,
    Ping = 3,
    Pong = 4,
    ConnectionReady = 5,
    SessionOpen = 6,
    SessionOpenResult = 7,
    SessionClose = 8,
    SessionClosed = 9,
    SessionJoin = 10,
    SessionResize = 11,
    ExecCommand = 12,
    ExecCommandResult = 13,
    PortCheck = 14,
    PortCheckResult = 15,
}

impl WireControlType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(WireControlType::EngineHello),
            2 => Some(WireControlType::EngineHelloAck),
            3 => Some(WireControlType::Ping),
            4 => Some(WireControlType::Pong),
            5 => Some(WireControlType::ConnectionReady),
            6 => Some(WireControlType::SessionOpen),
            7 => Some(WireControlType::SessionOpenResult),
            8 => Some(WireControlType::SessionClose),
            9 => Some(WireControlType::SessionClosed),
            10 => Some(WireControlType::SessionJoin),
            11 => Some(WireControlType::SessionResize),
            12 => Some(WireControlType::ExecCommand),
            13 => Some(WireControlType::ExecCommandResult),
            14 => Some(WireControlType::PortCheck),
            15 => Some(WireControlType::PortCheckResult),
            _ => None,
        }
    }
}

/// File-transfer envelope types.
///
/// Requests (client → engine) sit below 64, replies (engine → client)
/// from 64 up.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WireTransferType {
    ListDir = 1,
    Stat = 2,
    Mkdir = 3,
    Unlink = 4,
    Realpath = 5,
    ReadFile = 6,
    WriteBegin = 7,
    WriteData = 8,
    WriteEnd = 9,
    Rmdir = 10,
    Rename = 11,
    Chmod = 12,
    Exec = 13,
    SearchDirs = 14,

    Ready = 64,
    Ok = 65,
    Error = 66,
    DirList = 67,
    StatResult = 68,
    RealpathResult = 69,
    FileData = 70,
    FileEnd = 71,
    ExecResult = 72,
    SearchResult = 73,
}

impl WireTransferType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(WireTransferType::ListDir),
            2 => Some(WireTransferType::Stat),
            3 => Some(WireTransferType::Mkdir),
            4 => Some(WireTransferType::Unlink),
            5 => Some(WireTransferType::Realpath),
            6 => Some(WireTransferType::ReadFile),
            7 => Some(WireTransferType::WriteBegin),
            8 => Some(WireTransferType::WriteData),
            9 => Some(WireTransferType::WriteEnd),
            10 => Some(WireTransferType::Rmdir),
            11 => Some(WireTransferType::Rename),
            12 => Some(WireTransferType::Chmod),
            13 => Some(WireTransferType::Exec),
            14 => Some(WireTransferType::SearchDirs),
            64 => Some(WireTransferType::Ready),
            65 => Some(WireTransferType::Ok),
            66 => Some(WireTransferType::Error),
            67 => Some(WireTransferType::DirList),
            68 => Some(WireTransferType::StatResult),
            69 => Some(WireTransferType::RealpathResult),
            70 => Some(WireTransferType::FileData),
            71 => Some(WireTransferType::FileEnd),
            72 => Some(WireTransferType::ExecResult),
            73 => Some(WireTransferType::SearchResult),
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// Field writers
// -----------------------------------------------------------------------------

/// `[0] msg_type, [1] version, [2..4] reserved = 0`.
pub(crate) fn put_header(out: &mut Vec<u8>, msg_type: u8) {
    out.put_u8(msg_type);
    out.put_u8(PROTOCOL_VERSION);
    out.put_slice(&[0, 0]);
}

/// `u32 length + bytes`.
pub(crate) fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), ProtocolError> {
    let len = u32::try_from(bytes.len()).map_err(|_| ProtocolError::InvalidField("length"))?;
    out.put_u32(len);
    out.put_slice(bytes);
    Ok(())
}

pub(crate) fn put_str(out: &mut Vec<u8>, s: &str) -> Result<(), ProtocolError> {
    put_bytes(out, s.as_bytes())
}

/// Presence byte, then the string if present.
pub(crate) fn put_opt_str(out: &mut Vec<u8>, s: Option<&str>) -> Result<(), ProtocolError> {
    match s {
        Some(s) => {
            out.put_u8(1);
            put_str(out, s)
        }
        None => {
            out.put_u8(0);
            Ok(())
        }
    }
}

pub(crate) fn put_bool(out: &mut Vec<u8>, v: bool) {
    out.put_u8(u8::from(v));
}

pub(crate) fn put_count(out: &mut Vec<u8>, count: usize) -> Result<(), ProtocolError> {
    let count = u32::try_from(count).map_err(|_| ProtocolError::InvalidField("count"))?;
    out.put_u32(count);
    Ok(())
}

// -----------------------------------------------------------------------------
// Field reader
// -----------------------------------------------------------------------------

/// Bounds-checked cursor over an envelope body.
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        WireReader { buf }
    }

    fn need(&self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < n {
            return Err(ProtocolError::Truncated);
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn u16(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub(crate) fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub(crate) fn i32(&mut self) -> Result<i32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    pub(crate) fn u64(&mut self) -> Result<u64, ProtocolError> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    pub(crate) fn bool(&mut self, field: &'static str) -> Result<bool, ProtocolError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ProtocolError::InvalidField(field)),
        }
    }

    pub(crate) fn bytes(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = self.u32()? as usize;
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub(crate) fn string(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let raw = self.bytes()?;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| ProtocolError::InvalidUtf8(field))
    }

    pub(crate) fn opt_string(&mut self, field: &'static str) -> Result<Option<String>, ProtocolError> {
        if self.bool(field)? {
            Ok(Some(self.string(field)?))
        } else {
            Ok(None)
        }
    }

    /// Element count of a vector, sanity-checked against what is left
    /// so a corrupt count cannot trigger a huge allocation.
    pub(crate) fn count(&mut self, min_item_size: usize) -> Result<usize, ProtocolError> {
        let count = self.u32()? as usize;
        if count.saturating_mul(min_item_size) > self.buf.remaining() {
            return Err(ProtocolError::Truncated);
        }
        Ok(count)
    }
}

/// Validate the envelope header and return `(msg_type, body)`.
pub(crate) fn split_header(buf: &[u8]) -> Result<(u8, &[u8]), ProtocolError> {
    if buf.len() < ENVELOPE_HEADER_SIZE {
        return Err(ProtocolError::Truncated);
    }

    let msg_type = buf[0];
    let version = buf[1];

    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch(version));
    }

    Ok((msg_type, &buf[ENVELOPE_HEADER_SIZE..]))
}
