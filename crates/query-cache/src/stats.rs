//! Cache statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by both cache kinds of an [`LruCacher`](crate::LruCacher)
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of cache hits
    hits: AtomicU64,
    /// Number of cache misses
    misses: AtomicU64,
    /// Number of entries evicted by the size bound
    evictions: AtomicU64,
    /// Number of entries expired by TTL, on read or by a sweep
    expirations: AtomicU64,
    /// Number of explicit deletes and table clears
    invalidations: AtomicU64,
    /// Current number of cached id-lists
    id_entries: AtomicU64,
    /// Current number of cached beans
    bean_entries: AtomicU64,
}

impl CacheStats {
    /// Create new cache statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cache hit
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record TTL expirations
    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    /// Record an explicit invalidation
    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the id-list entry count
    pub fn set_id_entries(&self, count: u64) {
        self.id_entries.store(count, Ordering::Relaxed);
    }

    /// Update the bean entry count
    pub fn set_bean_entries(&self, count: u64) {
        self.bean_entries.store(count, Ordering::Relaxed);
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get expiration count
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Get invalidation count
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    pub fn id_entries(&self) -> u64 {
        self.id_entries.load(Ordering::Relaxed)
    }

    pub fn bean_entries(&self) -> u64 {
        self.bean_entries.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Get total requests (hits + misses)
    pub fn total_requests(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Reset the event counters; entry counts are left alone
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
    }
}

impl Clone for CacheStats {
    fn clone(&self) -> Self {
        Self {
            hits: AtomicU64::new(self.hits()),
            misses: AtomicU64::new(self.misses()),
            evictions: AtomicU64::new(self.evictions()),
            expirations: AtomicU64::new(self.expirations()),
            invalidations: AtomicU64::new(self.invalidations()),
            id_entries: AtomicU64::new(self.id_entries()),
            bean_entries: AtomicU64::new(self.bean_entries()),
        }
    }
}
