//! # Report Result Caching
//!
//! In-memory TTL cache for report payloads. See [`ttl_cache::TtlCache`] for
//! the expiry and eviction policy.

pub mod ttl_cache;

pub use ttl_cache::{CacheStats, SweeperHandle, TtlCache};
