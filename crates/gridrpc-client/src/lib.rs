//! gridrpc client
//!
//! Resolves a logical service name to candidate endpoints and calls them
//! with failover:
//!
//! - [`EndpointSet`] / [`Selection`] - which endpoints to try, and in what order
//! - [`ConnectionCache`] - idle connections reused across calls
//! - [`RpcClient`] - the call path itself

pub mod cache;
pub mod client;
pub mod endpoints;

pub use cache::{CacheKey, ConnectionCache, DEFAULT_MAX_IDLE_PER_ENDPOINT};
pub use client::{CallOutcome, RpcClient, DEFAULT_CALL_TIMEOUT};
pub use endpoints::{EndpointSet, Selection};
