//! Daemon/IPC error types (spec §4.9).

use thiserror::Error;

pub type IpcResult<T> = Result<T, IpcError>;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("socket idle for longer than the configured timeout")]
    IdleTimeout,

    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("no running service found")]
    ServiceNotRunning,
}
