//! cplane-server
//!
//! Control plane for detached engine processes: one TCP listener that
//! authenticates engines, routes session control messages to them and
//! hands raw data connections back to the application.

pub mod config;
pub mod data;
pub mod error;
pub mod policy;
pub mod registry;
pub mod server;
pub mod types;

// internal modules, not re-exported
mod connection;
mod coordinator;

pub use config::Config;
pub use data::DataConnection;
pub use error::ControlPlaneError;
pub use registry::{EngineRecord, EngineRegistry, RegistryError, StaticRegistry};
pub use server::ControlPlane;
pub use types::{
    EngineId, EngineInfo, ExecRequest, ExecResult, PortCheckReport, ServerEvent, SessionOpened,
};
