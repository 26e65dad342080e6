//! REST error types

use std::time::Duration;
use thiserror::Error;

/// Errors returned by the REST layer
///
/// Nothing in the dispatcher panics across this boundary; network and decode
/// failures are all reported through this type.
#[derive(Debug, Error)]
pub enum RestError {
    /// The token was rejected (HTTP 401)
    #[error("Unauthorized: the token was rejected")]
    Unauthorized,

    /// The server answered 429
    #[error("Rate limited, retry after {retry_after:?} (global: {global})")]
    RateLimited { retry_after: Duration, global: bool },

    /// Any other non-2xx response
    #[error("API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: u64,
        message: String,
    },

    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RestError {
    /// Get an error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Api { .. } => "API_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Decode(_) => "DECODE_ERROR",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }

    /// HTTP status, when the server produced one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::RateLimited { .. } => Some(429),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if repeating the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout | Self::Transport(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            // Strip the URL so query strings never reach logs
            Self::Transport(err.without_url().to_string())
        }
    }
}

/// REST result type
pub type RestResult<T> = Result<T, RestError>;
