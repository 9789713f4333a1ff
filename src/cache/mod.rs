//! Response caching for idempotent reads.
//!
//! # Responsibilities
//! - Hold provider responses for a bounded time (TTL) and size (LRU)
//! - Derive canonical keys so equivalent reads share an entry
//! - Sweep expired entries in the background
//!
//! # Design Decisions
//! - One cache per provider so TTLs and sizes can differ
//! - Caching is strictly opt-in per request; only GETs are eligible
//! - Expiry is checked on read; the sweeper only reclaims memory

pub mod key;
pub mod store;

pub use key::{request_key, CacheKeyBuilder};
pub use store::{CacheManager, CacheStats, ResponseCache};
