//! Cache configuration.

use std::time::Duration;

const DEFAULT_PUBLISHED_TTL: Duration = Duration::from_secs(60);
const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(10);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Lifetimes applied to the published-page cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long a loaded published view is served without reloading.
    pub published_ttl: Duration,
    /// How long a "no published version" answer short-circuits the loader.
    pub negative_ttl: Duration,
    /// Cadence of the background purge of expired entries.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            published_ttl: DEFAULT_PUBLISHED_TTL,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            published_ttl: settings.published_ttl,
            negative_ttl: settings.negative_ttl,
            sweep_interval: settings.sweep_interval,
        }
    }
}
