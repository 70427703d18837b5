//! Error types shared by the dispatch core.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for setup and supervision.
pub type Result<T> = std::result::Result<T, CrankdError>;

/// Errors that stop the daemon. Anything here is reported and exits with status 1.
#[derive(Error, Debug)]
pub enum CrankdError {
    /// Malformed event spec, unresolvable handler, unknown import.
    #[error("{0}")]
    Config(String),

    #[error("could not read {}: {source}", path.display())]
    ReadConfig { path: PathBuf, source: io::Error },

    #[error("could not parse {}: {source}", path.display())]
    ParseConfig {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("could not write {}: {reason}", path.display())]
    WriteConfig { path: PathBuf, reason: String },

    /// A configured event source does not exist on this platform.
    #[error("{0} events are not available on this platform")]
    Unsupported(&'static str),

    /// A native event source could not be created or started.
    #[error("{0}")]
    Platform(String),

    #[error("filesystem watch failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("unable to restart: {0}")]
    Restart(io::Error),
}

impl CrankdError {
    pub fn config(message: impl Into<String>) -> Self {
        CrankdError::Config(message.into())
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

/// Failure reported by a handler at invocation time. Logged, never fatal.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
}
