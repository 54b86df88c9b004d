//! File-transfer client.
//!
//! Wiring:
//! - a reader task decodes frames and completes pending requests by
//!   request id
//! - a writer task owns the write half and sends queued frames in order
//! - callers register a pending entry *before* their request is queued,
//!   so a reply can never beat its registration

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use cplane_core::{DirEntry, ExecOutput, FileStat, TransferBody, TransferMessage};
use cplane_protocol::builders::{transfer_frame, write_data_frame};
use cplane_protocol::{decode_transfer, FrameReader};

use crate::error::TransferError;
use crate::stream::{FileStream, ReadHandle, TransferFuture};

/// Default `WriteData` payload size.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

const READ_BUF_SIZE: usize = 64 * 1024;
const OUTBOUND_QUEUE: usize = 64;

#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Chunk size for in-memory uploads.
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Data for `write_file`.
pub enum WriteSource {
    /// Sent in `chunk_size` pieces.
    Buffer(Bytes),
    /// Each item becomes one `WriteData` message.
    Stream(Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>),
}

impl From<Bytes> for WriteSource {
    fn from(data: Bytes) -> Self {
        WriteSource::Buffer(data)
    }
}

impl From<Vec<u8>> for WriteSource {
    fn from(data: Vec<u8>) -> Self {
        WriteSource::Buffer(Bytes::from(data))
    }
}

/// Result of `realpath`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealPath {
    pub path: String,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadyState {
    Waiting,
    Ready,
    Closed,
}

enum Outbound {
    Frame(Bytes),
    Shutdown,
}

struct ReadState {
    chunks: mpsc::UnboundedSender<Result<Bytes, TransferError>>,
    total: Option<oneshot::Sender<Result<u64, TransferError>>>,
    done: oneshot::Sender<Result<(), TransferError>>,
}

enum Pending {
    Unary(oneshot::Sender<Result<TransferBody, TransferError>>),
    Read(ReadState),
}

impl Pending {
    /// Deliver the terminal reply for this request.
    fn complete(self, body: TransferBody) {
        match self {
            Pending::Unary(tx) => {
                let result = match body {
                    TransferBody::Error { message } => Err(TransferError::Remote(message)),
                    other => Ok(other),
                };
                let _ = tx.send(result);
            }
            Pending::Read(state) => match body {
                TransferBody::FileEnd => {
                    if let Some(total) = state.total {
                        let _ = total.send(Ok(0));
                    }
                    let _ = state.done.send(Ok(()));
                }
                TransferBody::Error { message } => {
                    let _ = state
                        .chunks
                        .send(Err(TransferError::Remote(message.clone())));
                    if let Some(total) = state.total {
                        let _ = total.send(Ok(0));
                    }
                    let _ = state.done.send(Err(TransferError::Remote(message)));
                }
                other => {
                    let kind = other.kind();
                    let _ = state.chunks.send(Err(TransferError::UnexpectedReply(kind)));
                    if let Some(total) = state.total {
                        let _ = total.send(Err(TransferError::UnexpectedReply(kind)));
                    }
                    let _ = state.done.send(Err(TransferError::UnexpectedReply(kind)));
                }
            },
        }
    }

    fn fail_closed(self) {
        match self {
            Pending::Unary(tx) => {
                let _ = tx.send(Err(TransferError::ConnectionClosed));
            }
            Pending::Read(state) => {
                let _ = state.chunks.send(Err(TransferError::ConnectionClosed));
                if let Some(total) = state.total {
                    let _ = total.send(Err(TransferError::ConnectionClosed));
                }
                let _ = state.done.send(Err(TransferError::ConnectionClosed));
            }
        }
    }
}

/// State shared with the reader and writer tasks.
struct Shared {
    pending: DashMap<u32, Pending>,
    closed: AtomicBool,
    ready: watch::Sender<ReadyState>,
}

impl Shared {
    fn dispatch(&self, msg: TransferMessage) {
        let TransferMessage { request_id, body } = msg;

        if let TransferBody::Ready = body {
            let first = self.ready.send_if_modified(|state| {
                if *state == ReadyState::Waiting {
                    *state = ReadyState::Ready;
                    true
                } else {
                    false
                }
            });
            if first {
                debug!("file-transfer channel ready");
            }
            return;
        }

        if matches!(body, TransferBody::FileData { .. }) {
            let streaming = self
                .pending
                .get(&request_id)
                .map(|entry| matches!(entry.value(), Pending::Read(_)));
            match streaming {
                Some(true) => {
                    if let TransferBody::FileData { data, total_size } = body {
                        if let Some(mut entry) = self.pending.get_mut(&request_id) {
                            if let Pending::Read(state) = entry.value_mut() {
                                if let Some(total) = state.total.take() {
                                    let _ = total.send(Ok(total_size));
                                }
                                let _ = state.chunks.send(Ok(Bytes::from(data)));
                            }
                        }
                    }
                    return;
                }
                // A unary request got file data: complete it as unexpected.
                Some(false) => {}
                None => {
                    debug!(request_id, "FileData for unknown request");
                    return;
                }
            }
        }

        trace!(request_id, kind = body.kind(), "reply");
        match self.pending.remove(&request_id) {
            Some((_, pending)) => pending.complete(body),
            None => debug!(request_id, kind = body.kind(), "reply for unknown request"),
        }
    }

    /// Reject everything outstanding; later registrations fail at once.
    fn fail_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.ready.send_if_modified(|state| {
            if *state == ReadyState::Waiting {
                *state = ReadyState::Closed;
                true
            } else {
                false
            }
        });

        let ids: Vec<u32> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                pending.fail_closed();
            }
        }
    }
}

/// Client for one engine file-transfer socket.
pub struct TransferClient {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Outbound>,
    ready: watch::Receiver<ReadyState>,
    next_id: AtomicU32,
    config: TransferConfig,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl TransferClient {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        TransferClient::with_config(stream, TransferConfig::default())
    }

    pub fn with_config<S>(stream: S, config: TransferConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (ready_tx, ready_rx) = watch::channel(ReadyState::Waiting);
        let shared = Arc::new(Shared {
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
            ready: ready_tx,
        });

        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);

        let reader_task = tokio::spawn(read_loop(read_half, shared.clone()));
        let writer_task = tokio::spawn(write_loop(write_half, outbound_rx, shared.clone()));

        TransferClient {
            shared,
            outbound,
            ready: ready_rx,
            next_id: AtomicU32::new(1),
            config: TransferConfig {
                chunk_size: config.chunk_size.max(1),
            },
            reader_task,
            writer_task,
        }
    }

    /// Wait for the engine's `Ready`. Fails if the connection closes first.
    pub async fn wait_for_ready(&self) -> Result<(), TransferError> {
        let mut rx = self.ready.clone();
        loop {
            match *rx.borrow_and_update() {
                ReadyState::Ready => return Ok(()),
                ReadyState::Closed => return Err(TransferError::ConnectionClosed),
                ReadyState::Waiting => {}
            }
            if rx.changed().await.is_err() {
                return Err(TransferError::ConnectionClosed);
            }
        }
    }

    pub async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, TransferError> {
        match self.call(TransferBody::ListDir { path: path.to_string() }).await? {
            TransferBody::DirList { entries } => Ok(entries),
            other => Err(TransferError::UnexpectedReply(other.kind())),
        }
    }

    pub async fn stat(&self, path: &str) -> Result<FileStat, TransferError> {
        match self.call(TransferBody::Stat { path: path.to_string() }).await? {
            TransferBody::StatResult(stat) => Ok(stat),
            other => Err(TransferError::UnexpectedReply(other.kind())),
        }
    }

    pub async fn mkdir(&self, path: &str) -> Result<(), TransferError> {
        expect_ok(self.call(TransferBody::Mkdir { path: path.to_string() }).await?)
    }

    pub async fn unlink(&self, path: &str) -> Result<(), TransferError> {
        expect_ok(self.call(TransferBody::Unlink { path: path.to_string() }).await?)
    }

    pub async fn realpath(&self, path: &str) -> Result<RealPath, TransferError> {
        match self.call(TransferBody::Realpath { path: path.to_string() }).await? {
            TransferBody::RealpathResult { path, is_dir } => Ok(RealPath { path, is_dir }),
            other => Err(TransferError::UnexpectedReply(other.kind())),
        }
    }

    pub async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), TransferError> {
        expect_ok(
            self.call(TransferBody::Rmdir {
                path: path.to_string(),
                recursive,
            })
            .await?,
        )
    }

    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), TransferError> {
        expect_ok(
            self.call(TransferBody::Rename {
                old_path: old_path.to_string(),
                new_path: new_path.to_string(),
            })
            .await?,
        )
    }

    pub async fn chmod(&self, path: &str, mode: u32) -> Result<(), TransferError> {
        expect_ok(
            self.call(TransferBody::Chmod {
                path: path.to_string(),
                mode,
            })
            .await?,
        )
    }

    /// Run a shell command on the engine host. A non-zero exit code is
    /// reported in the output, not as an error.
    pub async fn exec(&self, command: &str) -> Result<ExecOutput, TransferError> {
        match self.call(TransferBody::Exec { command: command.to_string() }).await? {
            TransferBody::ExecResult(output) => Ok(output),
            other => Err(TransferError::UnexpectedReply(other.kind())),
        }
    }

    /// Directories under `search_path` matching the engine's search,
    /// at most `max_results` of them.
    pub async fn search_dirs(
        &self,
        search_path: &str,
        max_results: u32,
    ) -> Result<Vec<String>, TransferError> {
        let body = TransferBody::SearchDirs {
            search_path: search_path.to_string(),
            max_results,
        };
        match self.call(body).await? {
            TransferBody::SearchResult { directories } => Ok(directories),
            other => Err(TransferError::UnexpectedReply(other.kind())),
        }
    }

    /// Start streaming `path` from the engine.
    pub async fn read_file(&self, path: &str) -> Result<ReadHandle, TransferError> {
        let id = self.next_request_id();
        let (chunks_tx, chunks_rx) = mpsc::unbounded_channel();
        let (total_tx, total_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        self.register(
            id,
            Pending::Read(ReadState {
                chunks: chunks_tx,
                total: Some(total_tx),
                done: done_tx,
            }),
        )?;
        let frame = transfer_frame(&TransferMessage::new(id, TransferBody::ReadFile {
            path: path.to_string(),
        }));
        self.send_registered(id, frame).await?;

        Ok(ReadHandle {
            stream: FileStream::new(chunks_rx),
            total_size: TransferFuture::new(total_rx),
            done: TransferFuture::new(done_rx),
        })
    }

    /// Upload `source` to `path`.
    ///
    /// Data only flows after the engine acknowledged `WriteBegin`, so a
    /// refused path fails before anything is sent.
    pub async fn write_file(
        &self,
        path: &str,
        source: impl Into<WriteSource>,
    ) -> Result<(), TransferError> {
        let id = self.next_request_id();
        expect_ok(
            self.call_with_id(id, TransferBody::WriteBegin { path: path.to_string() })
                .await?,
        )?;

        // The final Ok/Error for WriteEnd (or an early Error) lands here.
        let (tx, mut result) = oneshot::channel();
        self.register(id, Pending::Unary(tx))?;

        let mut sent = 0usize;
        match source.into() {
            WriteSource::Buffer(data) => {
                for chunk in data.chunks(self.config.chunk_size) {
                    if let Some(early) = take_early(&mut result) {
                        return early;
                    }
                    self.send_registered(id, write_data_frame(id, chunk)).await?;
                    sent += chunk.len();
                }
            }
            WriteSource::Stream(mut chunks) => {
                while let Some(chunk) = chunks.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            self.shared.pending.remove(&id);
                            return Err(e.into());
                        }
                    };
                    if chunk.is_empty() {
                        continue;
                    }
                    if let Some(early) = take_early(&mut result) {
                        return early;
                    }
                    self.send_registered(id, write_data_frame(id, &chunk)).await?;
                    sent += chunk.len();
                }
            }
        }

        let end = transfer_frame(&TransferMessage::new(id, TransferBody::WriteEnd));
        self.send_registered(id, end).await?;
        debug!(request_id = id, path, bytes = sent, "upload sent");

        expect_ok(TransferFuture::new(result).await?)
    }

    /// Shut the socket down and fail everything still outstanding.
    pub async fn close(&self) {
        self.shared.fail_all();
        let _ = self.outbound.send(Outbound::Shutdown).await;
        self.reader_task.abort();
    }

    fn next_request_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn call(&self, body: TransferBody) -> Result<TransferBody, TransferError> {
        let id = self.next_request_id();
        self.call_with_id(id, body).await
    }

    async fn call_with_id(
        &self,
        id: u32,
        body: TransferBody,
    ) -> Result<TransferBody, TransferError> {
        let (tx, rx) = oneshot::channel();
        self.register(id, Pending::Unary(tx))?;
        let frame = transfer_frame(&TransferMessage::new(id, body));
        self.send_registered(id, frame).await?;
        TransferFuture::new(rx).await
    }

    fn register(&self, id: u32, pending: Pending) -> Result<(), TransferError> {
        self.shared.pending.insert(id, pending);
        // The reader may have failed everything between our check and insert.
        if self.shared.closed.load(Ordering::SeqCst) {
            if let Some((_, pending)) = self.shared.pending.remove(&id) {
                pending.fail_closed();
            }
            return Err(TransferError::ConnectionClosed);
        }
        Ok(())
    }

    /// Queue a frame for a registered request, unregistering it on failure.
    async fn send_registered(
        &self,
        id: u32,
        frame: Result<Bytes, cplane_protocol::ProtocolError>,
    ) -> Result<(), TransferError> {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                self.shared.pending.remove(&id);
                return Err(e.into());
            }
        };
        if self.outbound.send(Outbound::Frame(frame)).await.is_err() {
            self.shared.pending.remove(&id);
            return Err(TransferError::ConnectionClosed);
        }
        Ok(())
    }
}

impl Drop for TransferClient {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

fn expect_ok(reply: TransferBody) -> Result<(), TransferError> {
    match reply {
        TransferBody::Ok => Ok(()),
        other => Err(TransferError::UnexpectedReply(other.kind())),
    }
}

/// The engine may answer an upload before `WriteEnd` (typically with an
/// error); stop sending if it has.
fn take_early(
    result: &mut oneshot::Receiver<Result<TransferBody, TransferError>>,
) -> Option<Result<(), TransferError>> {
    match result.try_recv() {
        Ok(reply) => Some(reply.and_then(expect_ok)),
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Closed) => Some(Err(TransferError::ConnectionClosed)),
    }
}

async fn read_loop<R>(mut read_half: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = FrameReader::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "file-transfer read failed");
                break;
            }
        };

        let fed = reader.feed(&buf[..n], |frame| match decode_transfer(&frame) {
            Ok(msg) => shared.dispatch(msg),
            Err(e) => warn!(error = %e, "dropping undecodable file-transfer frame"),
        });
        if let Err(e) = fed {
            warn!(error = %e, "invalid frame on file-transfer connection");
            break;
        }
    }

    debug!("file-transfer connection closed");
    shared.fail_all();
}

async fn write_loop<W>(mut write_half: W, mut outbound: mpsc::Receiver<Outbound>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if let Err(e) = write_half.write_all(&frame).await {
                    debug!(error = %e, "file-transfer write failed");
                    shared.fail_all();
                    break;
                }
            }
            Outbound::Shutdown => break,
        }
    }
    let _ = write_half.shutdown().await;
}
