//! Session error types.

use cadence_core::CoreError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by a [`ClientSession`](crate::ClientSession).
#[derive(Error, Debug)]
pub enum SessionError {
    /// The core rejected a call.
    #[error("core: {0}")]
    Core(#[from] CoreError),

    /// Configuration could not be loaded.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// The global logger could not be installed.
    #[error("logging: {0}")]
    Logging(String),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
