//! Semurg - feed engine for a wildlife sighting app
//!
//! Keyed TTL caching, stale-while-revalidate reads, paginated feeds with
//! optimistic post mutations, and per-view scroll continuity.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod identify;
pub mod scroll;
pub mod tasks;

pub use backend::{MemoryBackend, PageSource, PostBackend, RestBackend, SpeciesIdentifier};
pub use cache::{SharedCache, TtlCache};
pub use config::Config;
pub use error::{FeedError, Result};
pub use feed::{FeedConfig, FeedEvent, FeedLoader, FeedStore};
pub use fetch::{SwrOptions, SwrQuery};
pub use identify::{CachedIdentifier, SpeciesRecord};
pub use scroll::ScrollPositions;
pub use tasks::spawn_cleanup_task;
