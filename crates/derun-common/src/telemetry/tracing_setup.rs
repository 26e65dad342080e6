//! Tracing and logging setup
//!
//! Installs a `tracing` subscriber for binaries and tests. `RUST_LOG` wins
//! when set; otherwise the filter is built from the configured level, with
//! the WebSocket and HTTP stacks held at `warn` so shard logs stay readable.

use std::env;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Dependencies that are only interesting when something is broken
const QUIET_TARGETS: &[&str] = &["tungstenite", "tokio_tungstenite", "hyper", "hyper_util", "reqwest", "rustls"];

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for this library's crates when `RUST_LOG` is unset
    pub level: Level,
    /// Enable JSON output format
    pub json: bool,
    /// Log every gateway frame at `trace` regardless of `level`
    pub payloads: bool,
    /// Include span events (new, close)
    pub span_events: bool,
    /// Include file and line numbers
    pub file_line: bool,
    /// Include the target (module path) of each event
    pub target: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json: false,
            payloads: false,
            span_events: false,
            file_line: false,
            target: true,
        }
    }
}

impl TracingConfig {
    /// Debug logging with source locations, for local runs
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            json: false,
            payloads: false,
            span_events: true,
            file_line: true,
            target: true,
        }
    }

    /// Create a production configuration with JSON logging
    #[must_use]
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            json: true,
            payloads: false,
            span_events: false,
            file_line: false,
            target: true,
        }
    }

    /// Read `DERUN_LOG_LEVEL`, `DERUN_LOG_FORMAT` (`json` or `pretty`) and
    /// `DERUN_LOG_PAYLOADS`; unset or unparsable values keep the default
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` over an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(level) = lookup("DERUN_LOG_LEVEL").and_then(|v| v.trim().parse().ok()) {
            config.level = level;
        }
        if let Some(format) = lookup("DERUN_LOG_FORMAT") {
            config.json = format.trim().eq_ignore_ascii_case("json");
        }
        if let Some(payloads) = lookup("DERUN_LOG_PAYLOADS") {
            config.payloads = matches!(payloads.trim(), "1" | "true" | "yes");
        }
        config
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    /// Filter directives used when `RUST_LOG` is unset
    fn directives(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        let mut directives = vec![level];
        directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
        if self.payloads {
            directives.push("derun_gateway::shard=trace".to_string());
        }
        directives.join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()))
    }
}

/// Initialize the tracing subscriber with default configuration
///
/// # Panics
/// Panics if a global subscriber is already set.
pub fn init_tracing() {
    init_tracing_with_config(TracingConfig::default());
}

/// Initialize the tracing subscriber with custom configuration
///
/// # Panics
/// Panics if a global subscriber is already set.
pub fn init_tracing_with_config(config: TracingConfig) {
    if let Err(err) = try_init_tracing_with_config(config) {
        panic!("{err}");
    }
}

/// Initialize from `DERUN_LOG_*`, failing if a subscriber is already set
pub fn try_init_tracing() -> Result<(), TracingError> {
    try_init_tracing_with_config(TracingConfig::from_env())
}

/// Try to initialize tracing with custom configuration
///
/// Exactly one of the JSON or pretty layers is installed; the other slot is
/// `None`, which `tracing_subscriber` treats as a no-op layer.
pub fn try_init_tracing_with_config(config: TracingConfig) -> Result<(), TracingError> {
    let (json_layer, pretty_layer) = if config.json {
        let layer = fmt::layer()
            .json()
            .with_file(config.file_line)
            .with_line_number(config.file_line)
            .with_target(config.target)
            .with_span_events(config.span_events());
        (Some(layer), None)
    } else {
        let layer = fmt::layer()
            .with_file(config.file_line)
            .with_line_number(config.file_line)
            .with_target(config.target)
            .with_span_events(config.span_events());
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|_| TracingError::AlreadyInitialized)
}

/// Tracing initialization errors
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Tracing subscriber already initialized")]
    AlreadyInitialized,
}
