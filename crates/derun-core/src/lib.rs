//! # derun-core
//!
//! Core types shared by the REST and gateway layers: the intents bitfield
//! and a typed publish/subscribe emitter. No I/O lives in this crate.

pub mod error;
pub mod events;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use error::EmitterError;
pub use events::{Event, EventEmitter, ListenerId, DEFAULT_MAX_LISTENERS};
pub use value_objects::{Intents, UnknownIntent};
