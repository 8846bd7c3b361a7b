//! Error types shared across the host and worker pipelines.

use thiserror::Error;

/// Errors raised by tether components.
#[derive(Debug, Error)]
pub enum TetherError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("message kind '{0}' cannot be sent")]
    NotSendable(&'static str),

    #[error("queue closed")]
    QueueClosed,

    #[error("cancelled")]
    Cancelled,

    #[error("compile failed for {project}: {reason}")]
    Compile { project: String, reason: String },

    #[error("cannot resolve reference {path}: {reason}")]
    Reference { path: String, reason: String },

    #[error("{0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TetherError>;
