//! Rate limiting
//!
//! `RateLimiter` combines the global windows with per-route buckets.

mod bucket;
mod global;
mod limiter;
mod route;

pub use bucket::{RouteBucket, HEADER_GLOBAL, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET_AFTER};
pub use global::GlobalLimiter;
pub use limiter::RateLimiter;
pub use route::route_key;
