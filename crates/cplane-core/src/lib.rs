//! cplane-core
//!
//! Logical message types shared by the engine control plane:
//! - [`messages`]: control envelopes (engine lifecycle, sessions, exec,
//!   port checks)
//! - [`transfer`]: file-transfer envelopes (path operations, streaming I/O)
//! - [`session_type`]: remote session kinds

pub mod messages;
pub mod session_type;
pub mod transfer;

pub use session_type::{SessionType, UnknownSessionType};

pub use messages::{
    ConnectionParam,
    ConnectionReady,
    ControlMessage,
    EngineHello,
    EngineHelloAck,
    ExecCommand,
    ExecCommandResult,
    JumpHost,
    Ping,
    Pong,
    PortCheck,
    PortCheckEntry,
    PortCheckResult,
    PortCheckTarget,
    SessionClose,
    SessionClosed,
    SessionJoin,
    SessionOpen,
    SessionOpenResult,
    SessionResize,
};

pub use transfer::{DirEntry, ExecOutput, FileStat, TransferBody, TransferMessage};
