//! Minimal engine that dials into a control plane.
//!
//! - `CONTROL_PLANE_ADDR` (default "127.0.0.1:7800")
//! - `ENGINE_TOKEN`       registration token of a configured engine
//!
//! It answers `Ping`, accepts every `SessionOpen` / `SessionJoin` by
//! opening a data connection that echoes whatever it receives, runs
//! `ExecCommand` as a no-op that echoes the command, and answers
//! `PortCheck` with real TCP connect attempts.

use std::env;
use std::error::Error;
use std::time::Duration;

use bytes::Bytes;
use cplane_core::{
    ConnectionReady, ControlMessage, EngineHello, ExecCommandResult, PortCheckEntry,
    PortCheckResult, SessionOpenResult,
};
use cplane_protocol::builders::{control_frame, pong};
use cplane_protocol::{decode_control, FrameReader};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let addr = env::var("CONTROL_PLANE_ADDR").unwrap_or_else(|_| "127.0.0.1:7800".to_string());
    let token = env::var("ENGINE_TOKEN").ok();

    println!("Connecting to {}...", addr);
    let stream = TcpStream::connect(&addr).await?;
    let (mut read_half, mut write_half) = stream.into_split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    out_tx.send(control_frame(&ControlMessage::EngineHello(EngineHello {
        version: env!("CARGO_PKG_VERSION").to_string(),
        registration_token: token,
    }))?)?;

    let mut reader = FrameReader::new();
    let mut buf = vec![0u8; 8192];
    let mut next_connection = 1u64;

    loop {
        let n = read_half.read(&mut buf).await?;
        if n == 0 {
            println!("Control plane closed the connection.");
            return Ok(());
        }
        reader.push(&buf[..n]);

        while let Some(frame) = reader.next_frame()? {
            let msg = decode_control(&frame)?;
            match msg {
                ControlMessage::EngineHelloAck(ack) if ack.accepted => {
                    println!("Registered (server {}).", ack.server_version);
                }
                ControlMessage::EngineHelloAck(_) => {
                    println!("Registration rejected.");
                    return Ok(());
                }
                ControlMessage::Ping(ping) => out_tx.send(pong(ping.timestamp)?)?,
                ControlMessage::SessionOpen(open) => {
                    println!("SessionOpen {} -> {}:{}", open.session_id, open.host, open.port);
                    let connection_id = format!("demo-{}", next_connection);
                    next_connection += 1;
                    out_tx.send(control_frame(&ControlMessage::SessionOpenResult(
                        SessionOpenResult {
                            session_id: open.session_id.clone(),
                            success: true,
                            error_message: None,
                            connection_id: Some(connection_id),
                        },
                    ))?)?;
                    spawn_echo(addr.clone(), open.session_id);
                }
                ControlMessage::SessionJoin(join) => spawn_echo(addr.clone(), join.session_id),
                ControlMessage::SessionClose(close) => {
                    println!("SessionClose {}", close.session_id);
                }
                ControlMessage::SessionResize(resize) => {
                    println!("Resize {} to {}x{}", resize.session_id, resize.cols, resize.rows);
                }
                ControlMessage::ExecCommand(exec) => {
                    out_tx.send(control_frame(&ControlMessage::ExecCommandResult(
                        ExecCommandResult {
                            request_id: exec.request_id,
                            success: true,
                            stdout: exec.command,
                            stderr: String::new(),
                            exit_code: 0,
                            error_message: None,
                        },
                    ))?)?;
                }
                ControlMessage::PortCheck(check) => {
                    let out_tx = out_tx.clone();
                    tokio::spawn(async move {
                        let budget = Duration::from_millis(u64::from(check.timeout_ms));
                        let mut results = Vec::with_capacity(check.targets.len());
                        for target in check.targets {
                            let online = matches!(
                                timeout(budget, TcpStream::connect((target.host.as_str(), target.port))).await,
                                Ok(Ok(_))
                            );
                            results.push(PortCheckEntry { id: target.id, online });
                        }
                        let reply = ControlMessage::PortCheckResult(PortCheckResult {
                            request_id: check.request_id,
                            results,
                        });
                        if let Ok(frame) = control_frame(&reply) {
                            let _ = out_tx.send(frame);
                        }
                    });
                }
                other => println!("Ignoring {}", other.kind()),
            }
        }
    }
}

/// Open a data connection for `session_id` and echo its bytes.
fn spawn_echo(addr: String, session_id: String) {
    tokio::spawn(async move {
        let result: Result<(), Box<dyn Error + Send + Sync>> = async {
            let mut stream = TcpStream::connect(&addr).await?;
            let hello = control_frame(&ControlMessage::ConnectionReady(ConnectionReady {
                session_id: session_id.clone(),
            }))?;
            stream.write_all(&hello).await?;

            let mut buf = vec![0u8; 8192];
            loop {
                let n = stream.read(&mut buf).await?;
                if n == 0 {
                    return Ok(());
                }
                stream.write_all(&buf[..n]).await?;
            }
        }
        .await;

        match result {
            Ok(()) => println!("Data connection for {} closed.", session_id),
            Err(e) => eprintln!("Data connection for {} failed: {}", session_id, e),
        }
    });
}
