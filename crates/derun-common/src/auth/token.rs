//! Bot token wrapper
//!
//! The token is sent in the `Authorization` header and inside identify/resume
//! payloads. It must never reach a log line, so `Debug` and `Display` are masked.

use serde::Deserialize;
use std::fmt;

/// An opaque bot token
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct Token(String);

impl Token {
    /// Wrap a raw token
    ///
    /// Surrounding whitespace and a leading `Bot ` prefix are stripped, so a
    /// value copied straight from an `Authorization` header is accepted.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let trimmed = raw.trim();
        let bare = trimmed.strip_prefix("Bot ").unwrap_or(trimmed).trim();
        Self(bare.to_string())
    }

    /// Raw token value, for protocol payloads only
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("Bot {}", self.0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Token {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for Token {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}
