//! Token bucket rate limiting plus an HTTP admission gateway built on it.
//!
//! The [`Limiter`] is the reusable primitive; everything else wires it into
//! an axum service with YAML config and hot reload.

pub mod config;
pub mod deny_reason;
pub mod gateway;
pub mod limit;
pub mod state;
pub mod token_bucket;
pub mod watch;

pub use deny_reason::DenyReason;
pub use limit::{Limit, Rate, INF_DURATION};
pub use token_bucket::{Limiter, Reservation};
