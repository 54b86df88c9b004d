//! cplane-protocol
//!
//! Wire-level encoding/decoding for the engine control plane.
//!
//! This crate turns logical messages (`cplane_core::ControlMessage` /
//! `TransferMessage`) into bytes and back again:
//!
//! - [`frame`]          : 4-byte length-prefix framing, shared by both sub-protocols
//! - [`control_codec`]  : control envelopes (engine lifecycle, sessions, exec, port checks)
//! - [`transfer_codec`] : file-transfer envelopes
//! - [`builders`]       : encode + frame in one step

pub mod builders;
pub mod control_codec;
pub mod error;
pub mod frame;
pub mod transfer_codec;
pub mod wire_types;

pub use control_codec::{decode_control, encode_control};
pub use error::ProtocolError;
pub use frame::{encode_frame, FrameError, FrameReader, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
pub use transfer_codec::{decode_transfer, encode_transfer};
