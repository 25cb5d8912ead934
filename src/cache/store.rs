//! Read-through cache with per-key single-flight loading and negative entries.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error};

pub const CACHE_HIT_TOTAL: &str = "pages_cache_hit_total";
pub const CACHE_NEGATIVE_HIT_TOTAL: &str = "pages_cache_negative_hit_total";
pub const CACHE_MISS_TOTAL: &str = "pages_cache_miss_total";
pub const CACHE_LOAD_ERROR_TOTAL: &str = "pages_cache_load_error_total";
pub const CACHE_INVALIDATE_TOTAL: &str = "pages_cache_invalidate_total";
pub const CACHE_ENTRIES: &str = "pages_cache_entries";

/// Upper bound on how long any entry may live, whatever TTL the caller asks for.
pub const MAX_ENTRY_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Backend(String),
}

/// Invalidation seam used by writers.
///
/// Implementations may fail; callers treat failures as best-effort and never surface them.
pub trait CacheInvalidation: Send + Sync {
    fn invalidate(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Clone)]
enum Slot<V> {
    Present(V),
    Absent,
}

struct Entry<V> {
    slot: Slot<V>,
    expires_at: Instant,
}

/// Single-flight gate for one key.
///
/// `generation` is bumped by every invalidation of the key while the gate exists, so a load
/// that raced an invalidation can tell its result is stale.
#[derive(Default)]
struct Gate {
    lock: Mutex<()>,
    generation: AtomicU64,
}

/// In-memory read-through cache.
///
/// A miss is populated by at most one loader per key at a time: callers racing on the same
/// key queue behind a lazily created gate and re-check the cache once they hold it. Loader
/// results of `None` are remembered as negative entries for their own TTL. A load that overlaps
/// an invalidation of its key returns its result to the caller but does not cache it.
pub struct ReadThroughCache<V> {
    name: &'static str,
    entries: DashMap<String, Entry<V>>,
    gates: DashMap<String, Arc<Gate>>,
}

impl<V> ReadThroughCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            gates: DashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Return the cached value for `key`, loading it through `loader` on a miss.
    ///
    /// Loader failures are logged and reported as `None` without populating the cache.
    pub async fn get_or_load<F, Fut, E>(
        &self,
        key: &str,
        loader: F,
        ttl: Duration,
        negative_ttl: Duration,
    ) -> Option<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: Display,
    {
        if let Some(found) = self.lookup(key) {
            return found;
        }

        let _lease = GateLease {
            gates: &self.gates,
            key,
        };
        let gate = self.gates.entry(key.to_string()).or_default().clone();
        let _guard = gate.lock.lock().await;

        // Another caller may have populated the entry while this one waited.
        if let Some(found) = self.lookup(key) {
            return found;
        }

        counter!(CACHE_MISS_TOTAL, "cache" => self.name).increment(1);
        let generation = gate.generation.load(Ordering::Acquire);

        match loader().await {
            Ok(Some(value)) => {
                self.store(key, &gate, generation, Slot::Present(value.clone()), ttl);
                Some(value)
            }
            Ok(None) => {
                self.store(key, &gate, generation, Slot::Absent, negative_ttl);
                None
            }
            Err(err) => {
                counter!(CACHE_LOAD_ERROR_TOTAL, "cache" => self.name).increment(1);
                error!(
                    target = "page_manager::cache",
                    cache = self.name,
                    key,
                    error = %err,
                    "cache load failed; serving miss"
                );
                None
            }
        }
    }

    /// Drop the positive or negative entry for `key`.
    ///
    /// A load of `key` already in flight will not cache its result.
    pub fn invalidate(&self, key: &str) {
        if let Some(gate) = self.gates.get(key) {
            gate.generation.fetch_add(1, Ordering::AcqRel);
        }
        self.entries.remove(key);
        counter!(CACHE_INVALIDATE_TOTAL, "cache" => self.name).increment(1);
        gauge!(CACHE_ENTRIES, "cache" => self.name).set(self.entries.len() as f64);
        debug!(
            target = "page_manager::cache",
            cache = self.name,
            key,
            "cache entry invalidated"
        );
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let remaining = self.entries.len();
        gauge!(CACHE_ENTRIES, "cache" => self.name).set(remaining as f64);
        before.saturating_sub(remaining)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `Some(Some(v))` on a hit, `Some(None)` on a negative hit, `None` on a miss.
    fn lookup(&self, key: &str) -> Option<Option<V>> {
        let now = Instant::now();
        match self.entries.get(key) {
            None => return None,
            Some(entry) if entry.expires_at > now => {
                return Some(match &entry.slot {
                    Slot::Present(value) => {
                        counter!(CACHE_HIT_TOTAL, "cache" => self.name).increment(1);
                        Some(value.clone())
                    }
                    Slot::Absent => {
                        counter!(CACHE_NEGATIVE_HIT_TOTAL, "cache" => self.name).increment(1);
                        None
                    }
                });
            }
            Some(_) => {}
        }

        // Expired; the read guard is released before the shard is locked for removal.
        self.entries
            .remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    fn store(&self, key: &str, gate: &Gate, generation: u64, slot: Slot<V>, ttl: Duration) {
        let entry = Entry {
            slot,
            expires_at: Instant::now() + ttl.min(MAX_ENTRY_TTL),
        };
        {
            // The generation is checked under the shard lock `invalidate` needs for removal.
            let pending = self.entries.entry(key.to_string());
            if gate.generation.load(Ordering::Acquire) != generation {
                debug!(
                    target = "page_manager::cache",
                    cache = self.name,
                    key,
                    "key invalidated during load; result not cached"
                );
                return;
            }
            pending.insert(entry);
        }
        gauge!(CACHE_ENTRIES, "cache" => self.name).set(self.entries.len() as f64);
    }

    #[cfg(test)]
    fn gate_count(&self) -> usize {
        self.gates.len()
    }
}

impl<V> CacheInvalidation for ReadThroughCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        ReadThroughCache::invalidate(self, key);
        Ok(())
    }
}

/// Removes the key's gate once nobody holds or waits on it.
struct GateLease<'a> {
    gates: &'a DashMap<String, Arc<Gate>>,
    key: &'a str,
}

impl Drop for GateLease<'_> {
    fn drop(&mut self) {
        self.gates
            .remove_if(self.key, |_, gate| Arc::strong_count(gate) == 1);
    }
}
