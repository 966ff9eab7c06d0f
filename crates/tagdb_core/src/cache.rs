//! Sharded, byte-bounded LRU cache of value bytes.
//!
//! Values are keyed by the log offset of their first byte. Each shard is an
//! independent [`lru::LruCache`] behind its own lock and capped at
//! `capacity / shards` bytes, so lookups on different shards never contend.
//!
//! Evicted values are queued, not reported inline. The eviction callback
//! runs from [`ValueCache::deliver_evictions`], which the database calls
//! once its engine lock is released.

use crate::config::EvictionCallback;
use lru::LruCache;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

struct LruShard {
    entries: LruCache<u64, Vec<u8>>,
    bytes: usize,
    capacity: usize,
}

impl LruShard {
    fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            bytes: 0,
            capacity,
        }
    }

    fn evict_over_capacity(&mut self, evicted: &mut Vec<(u64, Vec<u8>)>) {
        while self.bytes > self.capacity {
            let Some((key, value)) = self.entries.pop_lru() else {
                break;
            };
            self.bytes -= value.len();
            evicted.push((key, value));
        }
    }
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that missed.
    pub misses: u64,
    /// Advisory item count.
    pub items: usize,
}

/// Bounded value cache used by the buffered load strategy.
pub struct ValueCache {
    shards: Vec<Mutex<LruShard>>,
    items: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    on_evict: Option<EvictionCallback>,
    undelivered: Mutex<Vec<(u64, Vec<u8>)>>,
}

impl ValueCache {
    /// Creates a cache of `capacity_bytes` split over `shards` shards.
    ///
    /// A shard count of zero is treated as one.
    #[must_use]
    pub fn new(capacity_bytes: usize, shards: usize, on_evict: Option<EvictionCallback>) -> Self {
        let shards = shards.max(1);
        let per_shard = capacity_bytes / shards;
        Self {
            shards: (0..shards)
                .map(|_| Mutex::new(LruShard::new(per_shard)))
                .collect(),
            items: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            on_evict,
            undelivered: Mutex::new(Vec::new()),
        }
    }

    fn shard(&self, key: u64) -> &Mutex<LruShard> {
        // Fibonacci hashing spreads sequential offsets across shards.
        let hash = key.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let idx = (hash >> 32) as usize % self.shards.len();
        &self.shards[idx]
    }

    /// Inserts or replaces the bytes stored under `key`.
    ///
    /// Replacing an existing key moves it to the front and never evicts.
    /// Returns true if inserting evicted at least one value. Evicted values
    /// wait for [`deliver_evictions`](Self::deliver_evictions).
    pub fn add(&self, key: u64, value: Vec<u8>) -> bool {
        let mut evicted = Vec::new();
        {
            let mut shard = self.shard(key).lock();
            let len = value.len();
            match shard.entries.put(key, value) {
                Some(old) => {
                    shard.bytes = shard.bytes - old.len() + len;
                    return false;
                }
                None => {
                    shard.bytes += len;
                    self.items.fetch_add(1, Ordering::Relaxed);
                    shard.evict_over_capacity(&mut evicted);
                }
            }
        }
        self.retire(evicted)
    }

    /// Returns a copy of the bytes under `key`, promoting it on a hit.
    pub fn get(&self, key: u64) -> Option<Vec<u8>> {
        let found = self.shard(key).lock().entries.get(&key).cloned();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Returns true if `key` is cached, without promoting it.
    #[must_use]
    pub fn contains(&self, key: u64) -> bool {
        self.shard(key).lock().entries.contains(&key)
    }

    /// Evicts `key`, queueing it for the eviction callback if it was present.
    pub fn remove(&self, key: u64) -> bool {
        let removed = {
            let mut shard = self.shard(key).lock();
            let removed = shard.entries.pop(&key);
            if let Some(value) = &removed {
                shard.bytes -= value.len();
            }
            removed
        };
        match removed {
            Some(value) => self.retire(vec![(key, value)]),
            None => false,
        }
    }

    /// Drops every cached value, clearing all shards in parallel.
    ///
    /// The eviction callback is not invoked.
    pub fn purge(&self) {
        let cleared = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for shard in &self.shards {
                let cleared = &cleared;
                scope.spawn(move || {
                    let mut shard = shard.lock();
                    cleared.fetch_add(shard.entries.len(), Ordering::Relaxed);
                    shard.entries.clear();
                    shard.bytes = 0;
                });
            }
        });
        self.items.store(0, Ordering::Relaxed);
        debug!(
            values = cleared.load(Ordering::Relaxed),
            shards = self.shards.len(),
            "value cache purged"
        );
    }

    /// Advisory number of cached values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.load(Ordering::Relaxed)
    }

    /// Returns true if the advisory item count is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes held across shards.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.shards.iter().map(|s| s.lock().bytes).sum()
    }

    /// Returns hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            items: self.len(),
        }
    }

    /// Runs the eviction callback for every value evicted since the last
    /// call, oldest first. Returns how many were delivered.
    ///
    /// No cache lock is held while the callback runs.
    pub fn deliver_evictions(&self) -> usize {
        let Some(callback) = &self.on_evict else {
            return 0;
        };
        let evicted = std::mem::take(&mut *self.undelivered.lock());
        for (key, value) in &evicted {
            callback(*key, value);
        }
        evicted.len()
    }

    fn retire(&self, evicted: Vec<(u64, Vec<u8>)>) -> bool {
        if evicted.is_empty() {
            return false;
        }
        let _ = self
            .items
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                n.checked_sub(evicted.len())
            });
        if self.on_evict.is_some() {
            self.undelivered.lock().extend(evicted);
        }
        true
    }
}

impl std::fmt::Debug for ValueCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCache")
            .field("shards", &self.shards.len())
            .field("items", &self.len())
            .finish_non_exhaustive()
    }
}
