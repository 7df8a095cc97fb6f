use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("`{tool}` not found; searched: {}", searched.join("; "))]
    ToolNotFound { tool: String, searched: Vec<String> },

    #[error("command `{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("unparseable response from `{command}`: {reason}")]
    UnparseableResponse { command: String, reason: String },

    #[error("memory sampling unsupported on this host: {0}")]
    PlatformUnsupported(String),

    #[error("device did not reach running state: {0}")]
    DeviceUnavailable(String),

    #[error("invalid project at {}: {reason}", path.display())]
    InvalidProject { path: PathBuf, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn command_failed(command: impl Into<String>, status: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            status: status.into(),
            stderr: stderr.into(),
        }
    }
}
