//! Scroll Position Module
//!
//! Per-view scroll offsets that survive a round trip to a detail view.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::lru::LruTracker;

// == Scroll Container ==
/// A scrollable surface owned by the UI layer.
pub trait ScrollContainer {
    /// Current vertical offset in pixels.
    fn offset(&self) -> f64;

    /// Moves the container to `offset`.
    fn set_offset(&mut self, offset: f64);
}

// == Scroll Positions ==
/// Remembers one scroll offset per view, evicting the least recently used view.
///
/// `save` must run synchronously before navigating away; by the time the
/// next view mounts, the container has already been reset.
#[derive(Debug)]
pub struct ScrollPositions {
    offsets: HashMap<String, f64>,
    lru: LruTracker<String>,
    capacity: usize,
    restore_lock: Duration,
    locked_until: Option<Instant>,
}

impl ScrollPositions {
    // == Constructor ==
    /// Creates a slot map holding at most `capacity` views (at least one).
    ///
    /// # Arguments
    /// * `capacity` - Number of views remembered
    /// * `restore_lock` - How long scroll events are ignored after `restore`
    pub fn new(capacity: usize, restore_lock: Duration) -> Self {
        Self {
            offsets: HashMap::new(),
            lru: LruTracker::new(),
            capacity: capacity.max(1),
            restore_lock,
            locked_until: None,
        }
    }

    /// Builds the slot map from configuration.
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.scroll_slots, config.scroll_restore_lock())
    }

    // == Save ==
    /// Captures the container's offset for `view`.
    pub fn save(&mut self, view: &str, container: &impl ScrollContainer) {
        self.record(view, container.offset());
    }

    // == Restore ==
    /// Applies the saved offset for `view`, if any.
    ///
    /// Arms the re-entrancy lock so the scroll events produced by this
    /// programmatic move do not overwrite the slot. Returns true if an
    /// offset was applied.
    pub fn restore(&mut self, view: &str, container: &mut impl ScrollContainer) -> bool {
        let Some(&offset) = self.offsets.get(view) else {
            return false;
        };

        self.locked_until = Some(Instant::now() + self.restore_lock);
        container.set_offset(offset);
        self.lru.touch(&view.to_string());
        debug!(view, offset, "restored scroll position");
        true
    }

    // == On Scroll ==
    /// Tracks a user scroll event. Ignored while a restore is settling.
    ///
    /// Returns true if the offset was recorded.
    pub fn on_scroll(&mut self, view: &str, container: &impl ScrollContainer) -> bool {
        if self.is_restoring() {
            return false;
        }
        self.record(view, container.offset());
        true
    }

    /// True while the restore lock is held.
    pub fn is_restoring(&self) -> bool {
        self.locked_until
            .is_some_and(|until| Instant::now() < until)
    }

    pub fn get(&self, view: &str) -> Option<f64> {
        self.offsets.get(view).copied()
    }

    /// Forgets the offset for `view`, e.g. after a pull-to-refresh.
    pub fn forget(&mut self, view: &str) {
        if self.offsets.remove(view).is_some() {
            self.lru.remove(&view.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    fn record(&mut self, view: &str, offset: f64) {
        let view = view.to_string();
        if !self.offsets.contains_key(&view) && self.offsets.len() >= self.capacity {
            if let Some(oldest) = self.lru.evict_oldest() {
                self.offsets.remove(&oldest);
                debug!(view = %oldest, "dropped scroll position");
            }
        }
        self.offsets.insert(view.clone(), offset);
        self.lru.touch(&view);
    }
}
