//! cplane-transfer
//!
//! Client side of an engine's file-transfer channel. One
//! [`TransferClient`] wraps one connected socket:
//!
//! - unary path operations (`list_dir`, `stat`, `mkdir`, ...) correlated
//!   by a per-client request id
//! - streaming reads ([`ReadHandle`]) and chunked writes ([`WriteSource`])
//! - every outstanding request fails with
//!   [`TransferError::ConnectionClosed`] when the socket goes away

pub mod client;
pub mod error;
pub mod stream;

pub use client::{RealPath, TransferClient, TransferConfig, WriteSource, DEFAULT_CHUNK_SIZE};
pub use error::TransferError;
pub use stream::{FileStream, ReadHandle, TransferFuture};
