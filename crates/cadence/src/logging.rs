//! Logging initialisation.

use tracing_subscriber::EnvFilter;

use crate::error::{SessionError, SessionResult};

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over
/// `default_filter`.
///
/// # Errors
///
/// [`SessionError::Logging`] if a subscriber is already installed.
pub fn init(default_filter: &str) -> SessionResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(true)
        .try_init()
        .map_err(|err| SessionError::Logging(err.to_string()))
}
