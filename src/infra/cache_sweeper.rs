use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::ReadThroughCache;

/// Periodically drop expired entries so keys that are never read again do not linger.
pub fn spawn_sweeper<V>(cache: Arc<ReadThroughCache<V>>, every: Duration) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                debug!(
                    target = "page_manager::cache_sweeper",
                    cache = cache.name(),
                    purged,
                    remaining = cache.len(),
                    "purged expired cache entries"
                );
            }
        }
    })
}
