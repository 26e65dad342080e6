//! Integration test utilities
//!
//! Runs a local stand-in for the HTTP API and the gateway so the client can
//! be exercised end to end without network access.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
