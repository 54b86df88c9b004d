//! Control plane server binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cplane_server::{Config, ControlPlane, ServerEvent, StaticRegistry};

#[derive(Parser)]
#[command(name = "cplane-server")]
#[command(about = "Control plane for remote-access engines")]
struct Cli {
    /// TOML config file (server settings and `[[engines]]`)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address, overrides config file and environment
    #[arg(long)]
    host: Option<String>,

    /// Bind port, overrides config file and environment
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let (mut config, engines) = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => (Config::from_env().context("reading environment")?, Vec::new()),
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    if engines.is_empty() {
        warn!("no engines configured; every EngineHello will be rejected");
    }
    info!(
        addr = %config.socket_addr_string(),
        engines = engines.len(),
        heartbeat_secs = config.heartbeat_interval.as_secs(),
        "starting cplane-server"
    );

    let registry = Arc::new(StaticRegistry::new(engines));
    let server = ControlPlane::start(config, registry)
        .await
        .context("starting control plane")?;

    let mut events = server.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event log lagging"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    server.stop().await;
    Ok(())
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::EngineConnected {
            engine_id,
            version,
            remote_addr,
        } => info!(%engine_id, %version, %remote_addr, "engine online"),
        ServerEvent::EngineDisconnected { engine_id } => info!(%engine_id, "engine offline"),
        ServerEvent::SessionOpenResult {
            session_id,
            success,
            error_message,
            ..
        } => info!(%session_id, success, error = ?error_message, "session open result"),
        ServerEvent::SessionClosed { session_id, reason } => {
            info!(%session_id, %reason, "session closed")
        }
        ServerEvent::DataConnectionReady { session_id } => {
            info!(%session_id, "data connection ready")
        }
        ServerEvent::DataConnectionClosed { session_id } => {
            info!(%session_id, "data connection closed")
        }
    }
}
