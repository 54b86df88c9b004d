//! Per-socket task.
//!
//! Every accepted socket starts out unidentified. Its first complete
//! frame decides what it is:
//! - `EngineHello` with a valid token: a **control** connection. A
//!   writer task drains the engine's frame channel; this task reads
//!   frames, answers `Ping` itself and forwards everything else to the
//!   coordinator.
//! - `ConnectionReady`: a **data** connection. Framing stops here; any
//!   bytes buffered past the handshake travel with the socket.
//! - anything else: protocol violation, the socket is closed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use cplane_core::{ControlMessage, EngineHello};
use cplane_protocol::builders::{engine_hello_ack, pong};
use cplane_protocol::{decode_control, FrameReader};

use crate::coordinator::Command;
use crate::data::DataConnection;
use crate::error::ControlPlaneError;
use crate::registry::EngineRegistry;
use crate::types::{CommandTx, ConnId, EngineId, FrameRx, FrameTx};

const READ_BUF_SIZE: usize = 16 * 1024;

/// Counter for assigning unique `ConnId`s (control sockets and data links).
static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

fn next_conn_id() -> ConnId {
    ConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
}

/// Handle one accepted socket until it closes or is handed off.
pub(crate) async fn run_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    commands: CommandTx,
    registry: Arc<dyn EngineRegistry>,
    server_version: String,
) -> Result<(), ControlPlaneError> {
    let mut reader = FrameReader::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    let first = loop {
        match reader.next_frame() {
            Ok(Some(frame)) => break frame,
            Ok(None) => {}
            Err(e) => {
                warn!(%peer_addr, error = %e, "invalid frame before handshake; closing");
                return Ok(());
            }
        }

        let n = stream.read(&mut buf).await?;
        if n == 0 {
            debug!(%peer_addr, "socket closed before handshake");
            return Ok(());
        }
        reader.push(&buf[..n]);
    };

    let msg = match decode_control(&first) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(%peer_addr, error = %e, "undecodable handshake; closing");
            return Ok(());
        }
    };

    match msg {
        ControlMessage::EngineHello(hello) => {
            run_control(stream, peer_addr, hello, reader, commands, registry, server_version).await
        }
        ControlMessage::ConnectionReady(ready) => {
            let residual = reader.drain();
            let link_id = next_conn_id().0;
            let (conn, link) =
                DataConnection::new(ready.session_id, link_id, stream, residual, commands.clone())?;
            // If the coordinator is gone the connection is simply dropped.
            let _ = commands.send(Command::DataReady { conn, link });
            Ok(())
        }
        other => {
            warn!(%peer_addr, kind = other.kind(), "unexpected first message; closing");
            Ok(())
        }
    }
}

async fn run_control(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    hello: EngineHello,
    reader: FrameReader,
    commands: CommandTx,
    registry: Arc<dyn EngineRegistry>,
    server_version: String,
) -> Result<(), ControlPlaneError> {
    let token = hello.registration_token.as_deref().unwrap_or_default();
    let record = if token.is_empty() {
        None
    } else {
        match registry.find_by_token(token).await {
            Ok(record) => record,
            Err(e) => {
                warn!(%peer_addr, error = %e, "registry lookup failed");
                None
            }
        }
    };

    let Some(record) = record else {
        warn!(%peer_addr, version = %hello.version, "rejecting engine: invalid registration token");
        let nack = engine_hello_ack(false, &server_version)?;
        let _ = stream.write_all(&nack).await;
        let _ = stream.shutdown().await;
        return Ok(());
    };

    if let Err(e) = registry.update_last_connected(record.id).await {
        warn!(engine_id = %record.id, error = %e, "failed to record last connection time");
    }

    let engine_id = record.id;
    let conn_id = next_conn_id();
    let kill = Arc::new(Notify::new());

    let (mut read_half, mut write_half) = stream.into_split();
    let (frames_tx, mut frames_rx): (FrameTx, FrameRx) = mpsc::unbounded_channel();

    // Writer task: push queued frames to the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = frames_rx.recv().await {
            if let Err(e) = write_half.write_all(&frame).await {
                debug!(%engine_id, error = %e, "control write failed");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let registered = Command::EngineRegistered {
        conn_id,
        engine_id,
        version: hello.version.clone(),
        remote_addr: peer_addr,
        frames: frames_tx.clone(),
        kill: kill.clone(),
    };
    if commands.send(registered).is_err() {
        writer.abort();
        return Ok(());
    }
    info!(%engine_id, name = %record.name, version = %hello.version, %peer_addr, "engine connected");

    let result = control_loop(
        engine_id,
        conn_id,
        &mut read_half,
        reader,
        &frames_tx,
        &commands,
        &kill,
    )
    .await;

    let _ = commands.send(Command::EngineGone { engine_id, conn_id });
    writer.abort();
    result
}

async fn control_loop<R>(
    engine_id: EngineId,
    conn_id: ConnId,
    read_half: &mut R,
    mut reader: FrameReader,
    frames: &FrameTx,
    commands: &CommandTx,
    kill: &Notify,
) -> Result<(), ControlPlaneError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        // Frames may already be buffered (e.g. sent right behind the hello).
        loop {
            let frame = match reader.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(%engine_id, error = %e, "invalid frame on control connection; closing");
                    return Ok(());
                }
            };
            if !dispatch(engine_id, conn_id, frame, frames, commands) {
                return Ok(());
            }
        }

        let n = tokio::select! {
            _ = kill.notified() => {
                debug!(%engine_id, "control connection closed by server");
                return Ok(());
            }
            read = read_half.read(&mut buf) => read?,
        };
        if n == 0 {
            return Ok(());
        }
        reader.push(&buf[..n]);
    }
}

/// Handle one control frame. Returns `false` once the coordinator is gone.
fn dispatch(
    engine_id: EngineId,
    conn_id: ConnId,
    frame: Bytes,
    frames: &FrameTx,
    commands: &CommandTx,
) -> bool {
    let msg = match decode_control(&frame) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(%engine_id, error = %e, "dropping undecodable control frame");
            return true;
        }
    };

    match msg {
        ControlMessage::Ping(ping) => {
            match pong(ping.timestamp) {
                Ok(reply) => {
                    let _ = frames.send(reply);
                }
                Err(e) => warn!(error = %e, "failed to encode Pong"),
            }
            true
        }
        msg => {
            tracing::trace!(%engine_id, kind = msg.kind(), "control frame");
            commands
                .send(Command::ControlFrame {
                    engine_id,
                    conn_id,
                    msg,
                })
                .is_ok()
        }
    }
}
