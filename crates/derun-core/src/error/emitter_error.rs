//! Emitter errors

use thiserror::Error;

/// Errors raised when registering listeners
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitterError {
    #[error("Listener limit of {max} reached for event {event}")]
    TooManyListeners { event: String, max: usize },
}

impl EmitterError {
    /// Get an error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::TooManyListeners { .. } => "TOO_MANY_LISTENERS",
        }
    }
}
