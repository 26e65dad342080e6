//! # derun-rest
//!
//! REST dispatch layer. Every call is serialized through a two-level rate
//! limiter: global per-second and per-10-minute windows, then a per-route
//! bucket whose state the server refreshes through `x-ratelimit-*` headers.

pub mod dispatcher;
pub mod error;
pub mod models;
pub mod ratelimit;
pub mod transport;

// Re-export commonly used types at crate root
pub use dispatcher::RestDispatcher;
pub use error::{RestError, RestResult};
pub use models::{ApiErrorBody, GatewayBotInfo, RateLimitBody, SessionStartLimit};
pub use ratelimit::{route_key, GlobalLimiter, RateLimiter, RouteBucket};
pub use transport::{HttpTransport, RawResponse, RequestMethod, ReqwestTransport, RestRequest};
