//! Configuration for the control plane server.
//!
//! Defaults can be overridden via environment variables:
//!
//! - `CONTROL_PLANE_HOST`               (default: "0.0.0.0")
//! - `CONTROL_PLANE_PORT`               (default: "7800")
//! - `CONTROL_PLANE_HEARTBEAT_SECS`     (default: "15")
//! - `CONTROL_PLANE_REQUEST_TIMEOUT_MS` (default: "30000")
//! - `CONTROL_PLANE_DATA_TIMEOUT_MS`    (default: "30000")
//! - `CONTROL_PLANE_FAIL_FAST`          (default: "false")
//! - `CONTROL_PLANE_SERVER_VERSION`     (default: crate version)
//!
//! The binary can also load a TOML file with the same keys in
//! snake_case plus an `[[engines]]` table; env vars win over the file.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::registry::EngineRecord;
use crate::types::EngineId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidVar { key: &'static str, value: String },

    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// IP address / interface to bind to (e.g. "0.0.0.0" or "127.0.0.1").
    pub host: String,

    /// TCP port to listen on. `0` picks an ephemeral port.
    pub port: u16,

    /// Interval between `Ping`s to every engine.
    pub heartbeat_interval: Duration,

    /// Window for `SessionOpenResult`, `ExecCommandResult` and
    /// `PortCheckResult` replies.
    pub request_timeout: Duration,

    /// Window for a `ConnectionReady` data socket to show up after
    /// `join_session` / `wait_for_data_connection`.
    pub data_connection_timeout: Duration,

    /// Reject pending requests as soon as their engine disconnects
    /// instead of letting them run into their timeout.
    pub fail_fast_on_disconnect: bool,

    /// Version reported to engines in `EngineHelloAck`.
    pub server_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port: 7800,
            heartbeat_interval: Duration::from_secs(15),
            request_timeout: Duration::from_millis(30_000),
            data_connection_timeout: Duration::from_millis(30_000),
            fail_fast_on_disconnect: false,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Engine entry of the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineEntry {
    pub id: EngineId,
    pub name: String,
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    heartbeat_secs: Option<u64>,
    request_timeout_ms: Option<u64>,
    data_timeout_ms: Option<u64>,
    fail_fast_on_disconnect: Option<bool>,
    server_version: Option<String>,
    #[serde(default)]
    engines: Vec<EngineEntry>,
}

impl Config {
    /// Construct a `Config` from environment variables, falling back
    /// to reasonable defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::default().with_env_overrides()
    }

    /// Parse a TOML config file, returning the config (with env
    /// overrides applied) and the engine records it declares.
    pub fn from_file(path: &Path) -> Result<(Self, Vec<EngineRecord>), ConfigError> {
        let text = fs::read_to_string(path)?;
        Config::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<(Self, Vec<EngineRecord>), ConfigError> {
        let file: FileConfig = toml::from_str(text)?;
        let defaults = Config::default();

        let config = Config {
            host: file.host.unwrap_or(defaults.host),
            port: file.port.unwrap_or(defaults.port),
            heartbeat_interval: file
                .heartbeat_secs
                .map(|secs| Duration::from_secs(secs.max(1)))
                .unwrap_or(defaults.heartbeat_interval),
            request_timeout: file
                .request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            data_connection_timeout: file
                .data_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.data_connection_timeout),
            fail_fast_on_disconnect: file
                .fail_fast_on_disconnect
                .unwrap_or(defaults.fail_fast_on_disconnect),
            server_version: file.server_version.unwrap_or(defaults.server_version),
        };

        let engines = file
            .engines
            .into_iter()
            .map(|e| EngineRecord::new(e.id, e.name, e.token))
            .collect();

        Ok((config.with_env_overrides()?, engines))
    }

    /// Apply any `CONTROL_PLANE_*` variables on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(host) = env::var("CONTROL_PLANE_HOST") {
            self.host = host;
        }
        if let Some(port) = read_env("CONTROL_PLANE_PORT")? {
            self.port = port;
        }
        if let Some(secs) = read_env::<u64>("CONTROL_PLANE_HEARTBEAT_SECS")? {
            self.heartbeat_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(ms) = read_env("CONTROL_PLANE_REQUEST_TIMEOUT_MS")? {
            self.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = read_env("CONTROL_PLANE_DATA_TIMEOUT_MS")? {
            self.data_connection_timeout = Duration::from_millis(ms);
        }
        if let Some(fail_fast) = read_env("CONTROL_PLANE_FAIL_FAST")? {
            self.fail_fast_on_disconnect = fail_fast;
        }
        if let Ok(version) = env::var("CONTROL_PLANE_SERVER_VERSION") {
            self.server_version = version;
        }
        Ok(self)
    }

    /// Convenience: `host:port` socket string.
    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn read_env<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar { key, value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_file_sets_fields_and_engines() {
        let text = r#"
            host = "127.0.0.1"
            port = 9100
            heartbeat_secs = 5
            request_timeout_ms = 1500
            fail_fast_on_disconnect = true

            [[engines]]
            id = 4
            name = "edge-a"
            token = "tok-a"

            [[engines]]
            id = 9
            name = "edge-b"
            token = "tok-b"
        "#;

        let (config, engines) = Config::from_toml_str(text).unwrap();
        assert_eq!(config.socket_addr_string(), "127.0.0.1:9100");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.data_connection_timeout, Duration::from_millis(30_000));
        assert!(config.fail_fast_on_disconnect);

        assert_eq!(engines.len(), 2);
        assert_eq!(engines[0].id, EngineId(4));
        assert_eq!(engines[1].name, "edge-b");
        assert_eq!(engines[1].registration_token, "tok-b");
        assert!(engines[1].last_connected_at.is_none());
    }

    #[test]
    fn zero_heartbeat_is_clamped() {
        let (config, _) = Config::from_toml_str("heartbeat_secs = 0").unwrap();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            Config::from_toml_str("max_clients = 10"),
            Err(ConfigError::Toml(_))
        ));
    }
}
