//! Core error types

mod emitter_error;

pub use emitter_error::EmitterError;
