//! # TTL Cache
//!
//! Bounded in-memory key/value store with per-entry expiration and
//! oldest-first eviction under capacity pressure. Reads are lazy-expiring;
//! a background sweeper additionally reclaims entries that are never read
//! again. All operations are infallible: absence is a normal outcome.

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Fraction of remaining entries evicted when cleanup leaves the cache at
/// or above capacity. Oldest entries by insertion time go first.
const EVICTION_FRACTION: f64 = 0.2;

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    created_at: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Introspection snapshot of the cache. Read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_entries: usize,
    pub default_ttl_ms: u64,
    pub keys: Vec<String>,
}

/// Bounded TTL cache. Values are cloned out on read; callers never hold
/// references into the internal store.
#[derive(Debug)]
pub struct TtlCache<T> {
    name: String,
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    max_entries: usize,
    default_ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(name: impl Into<String>, max_entries: usize, default_ttl: Duration) -> Self {
        let name = name.into();
        info!(
            cache = %name,
            max_entries,
            default_ttl_ms = default_ttl.as_millis() as u64,
            "📦 TTL cache initialized"
        );
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
            max_entries,
            default_ttl,
        }
    }

    /// Get a value if present and not expired. An expired entry found here
    /// is removed as a side effect.
    pub fn get(&self, key: &str) -> Option<T> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Found but expired: upgrade to a write lock and drop it.
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(CacheEntry::is_expired) {
            entries.remove(key);
            debug!(cache = %self.name, key, "Expired entry removed on read");
        }
        None
    }

    /// Insert or overwrite an entry with the default TTL.
    pub fn set(&self, key: impl Into<String>, value: T) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert or overwrite an entry, stamped with the current time. When the
    /// store is at capacity a cleanup pass runs first.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: T, ttl: Duration) {
        if self.entries.read().len() >= self.max_entries {
            self.cleanup();
        }
        let key = key.into();
        let mut entries = self.entries.write();
        entries.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Remove one entry; returns whether anything was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        info!(cache = %self.name, removed, "🧹 Cache cleared");
    }

    /// Remove all entries whose key satisfies the predicate; returns the
    /// number removed. This is the invalidation primitive the prefix and
    /// regex conveniences build on.
    pub fn delete_matching<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !predicate(key.as_str()));
        before - entries.len()
    }

    /// Remove all entries whose key starts with the given prefix.
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let removed = self.delete_matching(|key| key.starts_with(prefix));
        debug!(cache = %self.name, prefix, removed, "Prefix invalidation");
        removed
    }

    /// Remove all entries whose key matches the pattern.
    pub fn delete_pattern(&self, pattern: &Regex) -> usize {
        let removed = self.delete_matching(|key| pattern.is_match(key));
        debug!(cache = %self.name, pattern = %pattern, removed, "Pattern invalidation");
        removed
    }

    /// Introspection only, no mutation.
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        CacheStats {
            size: entries.len(),
            max_entries: self.max_entries,
            default_ttl_ms: self.default_ttl.as_millis() as u64,
            keys: entries.keys().cloned().collect(),
        }
    }

    /// Remove expired entries, then evict the oldest entries if the store is
    /// still at or above capacity. Returns the expired count only; eviction
    /// is a secondary effect.
    pub fn cleanup(&self) -> usize {
        let mut entries = self.entries.write();

        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let expired = before - entries.len();

        if entries.len() >= self.max_entries {
            // At least enough to leave room for the next insert; the 20%
            // fraction only matters for larger stores.
            let minimum = entries.len() + 1 - self.max_entries;
            let evict_count = ((entries.len() as f64 * EVICTION_FRACTION) as usize).max(minimum);
            if evict_count > 0 {
                let mut by_age: Vec<(String, Instant)> = entries
                    .iter()
                    .map(|(key, entry)| (key.clone(), entry.created_at))
                    .collect();
                by_age.sort_by_key(|(_, created_at)| *created_at);
                for (key, _) in by_age.into_iter().take(evict_count) {
                    entries.remove(&key);
                }
                info!(
                    cache = %self.name,
                    evicted = evict_count,
                    remaining = entries.len(),
                    "📦 Capacity eviction (oldest first)"
                );
            }
        }

        if expired > 0 {
            debug!(cache = %self.name, expired, "Cleanup removed expired entries");
        }
        expired
    }
}

impl<T: Clone + Send + Sync + 'static> TtlCache<T> {
    /// Spawn a background task that runs [`cleanup`](Self::cleanup) on an
    /// interval equal to the default TTL, so idle expired entries do not pin
    /// memory. The task holds only a weak reference and stops on its own
    /// once the cache is dropped; the returned handle aborts it on drop so
    /// shutdown never waits on the sweep.
    pub fn start_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let cache: Weak<Self> = Arc::downgrade(self);
        let interval = self.default_ttl;
        let name = self.name.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else { break };
                let expired = cache.cleanup();
                if expired > 0 {
                    debug!(cache = %name, expired, "Background sweep");
                }
            }
        });
        SweeperHandle { handle }
    }
}

/// Guard for the background sweep task. Dropping it cancels the sweep.
#[derive(Debug)]
pub struct SweeperHandle {
    handle: JoinHandle<()>,
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
