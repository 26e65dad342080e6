//! # derun-common
//!
//! Shared utilities including configuration, token handling, and telemetry.

pub mod auth;
pub mod config;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use auth::Token;
pub use config::{ClientConfig, ConfigError, GatewayConfig, RestConfig, ShardCount};
pub use telemetry::{
    init_tracing, init_tracing_with_config, try_init_tracing, try_init_tracing_with_config,
    TracingConfig, TracingError,
};
