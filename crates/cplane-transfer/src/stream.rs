//! Caller-facing halves of in-flight requests.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};

use crate::error::TransferError;

/// Resolves once the engine finishes a request. Fails with
/// `ConnectionClosed` if the client shut down first.
#[derive(Debug)]
pub struct TransferFuture<T> {
    rx: oneshot::Receiver<Result<T, TransferError>>,
}

impl<T> TransferFuture<T> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<T, TransferError>>) -> Self {
        TransferFuture { rx }
    }
}

impl<T> Future for TransferFuture<T> {
    type Output = Result<T, TransferError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TransferError::ConnectionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// File contents as they arrive. Ends after `FileEnd`; yields one
/// error item if the transfer fails.
#[derive(Debug)]
pub struct FileStream {
    rx: mpsc::UnboundedReceiver<Result<Bytes, TransferError>>,
}

impl FileStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Result<Bytes, TransferError>>) -> Self {
        FileStream { rx }
    }

    /// Collect the whole file.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>, TransferError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl Stream for FileStream {
    type Item = Result<Bytes, TransferError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Handle returned by `read_file`.
#[derive(Debug)]
pub struct ReadHandle {
    pub stream: FileStream,

    /// Size announced by the first `FileData`, or 0 when no data arrives
    /// (an empty file, or an error before the first chunk).
    pub total_size: TransferFuture<u64>,

    /// Completes after `FileEnd`, or fails with the transfer's error.
    pub done: TransferFuture<()>,
}
