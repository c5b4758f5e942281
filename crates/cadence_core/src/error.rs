//! # Core Error Types
//!
//! Two families live here:
//!
//! - [`CoreError`]: contract violations reported back to the caller of a
//!   runtime entry point. Returning one never changes state.
//! - [`HandlerError`]: faults raised by module code (handlers, interceptors,
//!   sequence bodies). They are caught at the component boundary, logged and
//!   counted; they never propagate into the host loop.

use cadence_shared::{OwnerId, Tick};
use thiserror::Error;

use crate::scheduler::{SequenceId, SequenceState};

/// Errors returned by runtime entry points.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The owner was never registered.
    #[error("unknown owner: {0}")]
    UnknownOwner(OwnerId),

    /// The owner is disabled and cannot register anything new.
    #[error("{0} is disabled")]
    OwnerDisabled(OwnerId),

    /// The sequence already reached a terminal state.
    #[error("sequence {id} is already {state:?}")]
    SequenceFinished {
        /// Sequence that was addressed.
        id: SequenceId,
        /// Its terminal state.
        state: SequenceState,
    },

    /// The sequence is executing right now and cannot be resumed from inside itself.
    #[error("sequence {0} is running")]
    SequenceRunning(SequenceId),

    /// The sequence is runnable, not suspended, so there is nothing to resume.
    #[error("sequence {0} is not suspended")]
    SequenceNotSuspended(SequenceId),

    /// `on_tick` was called while a tick was already being processed.
    #[error("re-entrant tick while processing {0}")]
    ReentrantTick(Tick),
}

/// Result type for runtime entry points.
pub type CoreResult<T> = Result<T, CoreError>;

/// A fault raised by module code.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Plain failure description.
    #[error("{0}")]
    Failed(String),

    /// A runtime call made by module code was rejected.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Failure wrapping another error.
    #[error(transparent)]
    Source(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Creates a fault from a description.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::Failed(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::Failed(message.to_owned())
    }
}

/// Result type for module code.
pub type HandlerResult<T = ()> = Result<T, HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_from_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket gone");
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(io);
        let err = HandlerError::from(boxed);
        assert_eq!(err.to_string(), "socket gone");
    }

    #[test]
    fn test_core_error_converts() {
        fn register() -> HandlerResult {
            Err(CoreError::UnknownOwner(OwnerId(1)))?;
            Ok(())
        }
        assert!(matches!(register(), Err(HandlerError::Core(CoreError::UnknownOwner(_)))));
    }

    #[test]
    fn test_core_error_display() {
        let err = CoreError::OwnerDisabled(OwnerId(3));
        assert_eq!(err.to_string(), "owner:3 is disabled");
    }
}
