//! Value objects

mod intents;

pub use intents::{Intents, UnknownIntent};
