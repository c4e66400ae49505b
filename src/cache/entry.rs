//! Cache Entry Module
//!
//! Defines a single cache entry with TTL and access metadata.

use std::time::Duration;

use tokio::time::Instant;

// == Cache Entry ==
/// A cached value with its validity window and access history.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value, opaque to the cache
    pub value: V,
    /// When the value was stored
    pub stored_at: Instant,
    /// Validity window measured from `stored_at`
    pub ttl: Duration,
    /// Number of hits served by this entry
    pub access_count: u64,
    /// Last hit, or `stored_at` if never read
    pub last_accessed_at: Instant,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new entry stored now.
    pub fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            stored_at: now,
            ttl,
            access_count: 0,
            last_accessed_at: now,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// An entry is expired once `now - stored_at >= ttl`, so a zero TTL is
    /// expired immediately.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= self.ttl
    }

    /// Checks if the entry has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    // == Touch ==
    /// Records a hit.
    pub fn touch(&mut self, now: Instant) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }

    // == Retention Score ==
    /// Eviction score: frequently and recently used entries score higher.
    ///
    /// The lowest-scoring entries are evicted first.
    pub fn retention_score(&self, now: Instant) -> f64 {
        let idle_ms = now.saturating_duration_since(self.last_accessed_at).as_millis() as f64;
        (self.access_count as f64 + 1.0) / (idle_ms + 1.0)
    }

    // == Time To Live ==
    /// Returns the remaining validity, zero once expired.
    pub fn ttl_remaining(&self) -> Duration {
        self.ttl
            .saturating_sub(Instant::now().saturating_duration_since(self.stored_at))
    }
}
