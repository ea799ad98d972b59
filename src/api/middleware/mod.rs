//! API Middleware
//!
//! Request metrics. Authentication and rate limiting live in `crate::auth`.

pub mod metrics;

pub use metrics::metrics_middleware;
