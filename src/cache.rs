//! Response caching with TTL
//!
//! Thread-safe cache of JSON:API response documents keyed by [`CacheKey`].
//! Expired entries are evicted lazily on lookup; there is no background sweep.
//! Long-lived owners can call [`ResponseCache::evict_expired`] themselves or
//! bound the table with `max_entries`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::key::CacheKey;

/// Thread-safe response cache with TTL expiry
pub struct ResponseCache {
    /// Cache entries keyed by request URL + canonical params
    entries: DashMap<CacheKey, CacheEntry>,
    /// Time-to-live applied to every entry
    ttl: Duration,
    /// Optional bound on the number of entries
    max_entries: Option<usize>,
    /// Cache statistics
    stats: CacheStats,
}

/// A cached response document
struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Total cache hits (entries served from cache)
    pub hits: AtomicU64,
    /// Total cache misses (entries not found or expired)
    pub misses: AtomicU64,
    /// Total evictions (expired or over-capacity entries removed)
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Get current cache hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get current cache miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get current eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Calculate hit rate as a fraction (0.0-1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl ResponseCache {
    /// Create an empty cache with the given TTL and optional size bound
    #[must_use]
    pub fn new(ttl: Duration, max_entries: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries,
            stats: CacheStats::default(),
        }
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.duration_since(entry.stored_at) > self.ttl
    }

    /// Get a cached response if it exists and hasn't expired
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let Some(entry) = self.entries.get(key) else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache miss");
            return None;
        };

        let now = Instant::now();
        if self.is_expired(&entry, now) {
            drop(entry);
            self.evict_if_expired(key, now);
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache entry expired");
            None
        } else {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache hit");
            Some(entry.value.clone())
        }
    }

    /// Remove `key` only if its entry is still expired at `now`.
    /// A fresh entry stored since the expiry check is kept.
    fn evict_if_expired(&self, key: &CacheKey, now: Instant) -> bool {
        let evicted = self
            .entries
            .remove_if(key, |_, entry| self.is_expired(entry, now))
            .is_some();
        if evicted {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Store a value, replacing any previous entry for `key`
    pub fn set(&self, key: CacheKey, value: Value) {
        if let Some(max) = self.max_entries {
            if !self.entries.contains_key(&key) && self.entries.len() >= max {
                self.evict_for_capacity(max);
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Make room for one more entry: drop expired entries first, then the oldest
    fn evict_for_capacity(&self, max: usize) {
        self.evict_expired();
        while self.entries.len() >= max {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().stored_at)
                .map(|e| e.key().clone());
            let Some(key) = oldest else { break };
            self.entries.remove(&key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Evicted oldest cache entry (capacity)");
        }
    }

    /// Remove a single entry; returns `true` if one was present
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Clear all cached entries
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Evict every expired entry
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !self.is_expired(entry, now));
        let count = before.saturating_sub(self.entries.len());

        if count > 0 {
            self.stats
                .evictions
                .fetch_add(count as u64, Ordering::Relaxed);
            debug!(count, "Evicted expired cache entries");
        }
    }

    /// Number of stored entries (expired ones included until evicted)
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no entries are stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            evictions: self.stats.evictions(),
            size: self.entries.len(),
            hit_rate: self.stats.hit_rate(),
        }
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Total evictions
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}
