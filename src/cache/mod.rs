//! Page-manager cache layer
//!
//! A single in-memory layer sits in front of the published-page query:
//!
//! - **Read-through**: a miss runs the supplied loader and stores its answer
//! - **Single-flight**: concurrent misses on one key share a gate, so one loader runs per key
//! - **Negative entries**: "nothing published" answers are remembered for a shorter TTL
//!
//! Writers invalidate through [`CacheInvalidation`] after their transaction commits.
//!
//! ## Configuration
//!
//! Lifetimes come from the `[cache]` settings section:
//!
//! ```toml
//! [cache]
//! published_ttl = "60s"
//! negative_ttl = "10s"
//! sweep_interval = "30s"
//! ```

mod config;
mod keys;
mod store;

pub use config::CacheConfig;
pub use keys::published_page_key;
pub use store::{
    CACHE_ENTRIES, CACHE_HIT_TOTAL, CACHE_INVALIDATE_TOTAL, CACHE_LOAD_ERROR_TOTAL,
    CACHE_MISS_TOTAL, CACHE_NEGATIVE_HIT_TOTAL, CacheError, CacheInvalidation, MAX_ENTRY_TTL,
    ReadThroughCache,
};
