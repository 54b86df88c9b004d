//! Length-prefixed framing shared by both sub-protocols.
//!
//! ```text
//! [0..4]  payload length (u32 BE, 1..=MAX_FRAME_SIZE)
//! [4..]   payload (one envelope)
//! ```
//!
//! [`FrameReader`] accumulates arbitrary chunks off a socket and hands
//! back complete payloads. A declared length of zero or above
//! [`MAX_FRAME_SIZE`] poisons the reader: the error is reported once
//! and every later byte is ignored, the caller is expected to close the
//! connection.
//!
//! [`FrameReader::drain`] exists for data connections: the handshake
//! frame may share a TCP segment with raw session bytes, which must be
//! given back to the socket's consumer rather than parsed as frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest payload accepted on the wire (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Declared (or requested) payload length is 0 or over the limit.
    #[error("invalid frame length {0}")]
    InvalidLength(usize),
}

fn check_len(len: usize) -> Result<(), FrameError> {
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(FrameError::InvalidLength(len));
    }
    Ok(())
}

/// Frame a single payload, ready to be written to a socket.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, FrameError> {
    check_len(payload.len())?;
    let mut out = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    out.put_u32(payload.len() as u32);
    out.extend_from_slice(payload);
    Ok(out.freeze())
}

/// Incremental decoder for a stream of frames.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: BytesMut,
    poisoned: bool,
}

impl FrameReader {
    pub fn new() -> Self {
        FrameReader::default()
    }

    /// Append bytes read off the socket. Ignored once poisoned.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.poisoned {
            return;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete payload, if one is buffered.
    ///
    /// Returns `Err` exactly once, on the first invalid length; the
    /// reader then drops its buffer and yields `Ok(None)` forever.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        if self.poisoned || self.buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let declared = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        let len = declared as usize;

        if let Err(err) = check_len(len) {
            self.poisoned = true;
            self.buf.clear();
            return Err(err);
        }

        if self.buf.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }

        self.buf.advance(FRAME_HEADER_SIZE);
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    /// Push `chunk` and hand every complete payload to `on_frame`.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_frame: F) -> Result<(), FrameError>
    where
        F: FnMut(Bytes),
    {
        self.push(chunk);
        while let Some(payload) = self.next_frame()? {
            on_frame(payload);
        }
        Ok(())
    }

    /// Take every buffered-but-unconsumed byte, leaving the reader empty.
    pub fn drain(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}
