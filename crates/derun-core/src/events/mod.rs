//! Typed publish/subscribe

mod emitter;

pub use emitter::{Event, EventEmitter, ListenerId, DEFAULT_MAX_LISTENERS};
