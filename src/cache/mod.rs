//! Cache Module
//!
//! Provides an in-memory key/value cache with TTL expiration and bounded size.

mod entry;
mod stats;
mod store;


use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

// Re-export public types
pub use entry::CacheEntry;
pub use stats::CacheStats;
pub use store::TtlCache;

/// Cache instance shared between fetchers, loaders and the cleanup task.
///
/// `get` records access metadata, so readers take the write lock too.
pub type SharedCache<V> = Arc<RwLock<TtlCache<V>>>;

/// Builds a new shared cache.
pub fn shared<V: Clone>(max_entries: usize, default_ttl: Duration) -> SharedCache<V> {
    Arc::new(RwLock::new(TtlCache::new(max_entries, default_ttl)))
}
