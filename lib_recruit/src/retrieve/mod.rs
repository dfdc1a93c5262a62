//! # Data Retrieval Module
//!
//! Outbound requests to the game-world API. Every lookup goes through one
//! [`NsClient`], which owns the [`RateLimiter`] that keeps the process inside
//! the API's request quota.
//!
//! ## Contained Modules:
//!
//! - **`ratelimit`**: local window plus server-reported bucket accounting.
//! - **`ns_http`**: the `reqwest` client, shard documents and the typed
//!   lookups built on them (founding time, new-nation details).

/// Request quota accounting fed by `RateLimit-*` response headers.
pub mod ratelimit;

/// Rate-limited API client and XML shard extraction.
pub mod ns_http;

pub use ns_http::{NewNation, NsClient, NsClientConfig, ShardDocument};
pub use ratelimit::{RateLimiter, RateSnapshot};
