//! Scroll Module
//!
//! Scroll-position continuity between feed views and detail views.

mod lru;
mod positions;

pub use lru::LruTracker;
pub use positions::{ScrollContainer, ScrollPositions};
