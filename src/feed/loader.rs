//! Paginated Feed Loader
//!
//! One loader for every feed: cursor- or offset-paginated, with guarded
//! initial load, guarded load-more, refresh and id de-duplication.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::PageSource;
use crate::cache::SharedCache;
use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::feed::{Cursor, FeedEntry, FeedPage, PageRequest};

// == Feed Config ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationMode {
    /// Follow the server's `next_cursor`
    Cursor,
    /// Count fetched items and request `offset = count`
    Offset,
}

/// Per-feed loader settings.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub page_size: usize,
    pub mode: PaginationMode,
    pub filters: BTreeMap<String, String>,
}

impl FeedConfig {
    /// Cursor-paginated feed with the given page size (at least one).
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            mode: PaginationMode::Cursor,
            filters: BTreeMap::new(),
        }
    }

    /// Post feed settings, sized by `FEED_PAGE_SIZE`.
    pub fn for_posts(config: &Config) -> Self {
        Self::new(config.feed_page_size)
    }

    /// Facts feed settings, sized by `FACTS_PAGE_SIZE` and paged by offset.
    pub fn for_facts(config: &Config) -> Self {
        Self::new(config.facts_page_size).offset_paginated()
    }

    pub fn offset_paginated(mut self) -> Self {
        self.mode = PaginationMode::Offset;
        self
    }

    pub fn with_filter(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(column.into(), value.into());
        self
    }
}

// == Feed State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPhase {
    /// Nothing loaded yet
    Idle,
    /// First page in flight, nothing to show
    InitialLoading,
    Ready,
    LoadingMore,
}

/// Snapshot of a feed, published to subscribers on every change.
#[derive(Debug, Clone)]
pub struct FeedState<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Cursor>,
    pub has_more: bool,
    /// Pull-to-refresh spinner; never changes fetch behavior
    pub is_refreshing: bool,
    /// Last failure, cleared when the next load starts
    pub error: Option<FeedError>,
    loaded: bool,
    loading_initial: bool,
    loading_more: bool,
    generation: u64,
}

impl<T> Default for FeedState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_more: false,
            is_refreshing: false,
            error: None,
            loaded: false,
            loading_initial: false,
            loading_more: false,
            generation: 0,
        }
    }
}

impl<T> FeedState<T> {
    pub fn phase(&self) -> FeedPhase {
        if self.loading_more {
            FeedPhase::LoadingMore
        } else if self.loading_initial && !self.loaded {
            FeedPhase::InitialLoading
        } else if self.loaded {
            FeedPhase::Ready
        } else {
            FeedPhase::Idle
        }
    }

    pub fn is_loading_initial(&self) -> bool {
        self.loading_initial
    }

    pub fn is_loading_more(&self) -> bool {
        self.loading_more
    }
}

// == De-duplication ==
/// Appends `incoming` to `items`, skipping ids already present.
///
/// Keeps first-seen order and returns the number of items added.
pub fn append_unique<T: FeedEntry>(items: &mut Vec<T>, incoming: Vec<T>) -> usize {
    let mut seen: HashSet<String> = items.iter().map(|i| i.entry_id().to_string()).collect();
    let before = items.len();
    for item in incoming {
        if seen.insert(item.entry_id().to_string()) {
            items.push(item);
        }
    }
    items.len() - before
}

// == Load Guard ==
#[derive(Debug, Clone, Copy)]
enum LoadKind {
    Initial,
    More,
}

/// In-flight marker for one load.
///
/// Dropping it before `settle` clears the load's flag, so a load whose
/// future was cancelled never blocks the next one.
struct LoadGuard<'a, T> {
    state: &'a watch::Sender<FeedState<T>>,
    kind: LoadKind,
    generation: u64,
    settled: bool,
}

impl<'a, T> LoadGuard<'a, T> {
    fn new(state: &'a watch::Sender<FeedState<T>>, kind: LoadKind, generation: u64) -> Self {
        Self {
            state,
            kind,
            generation,
            settled: false,
        }
    }

    /// Marks the load as committed; its flag was cleared with the result.
    fn settle(mut self) {
        self.settled = true;
    }
}

impl<T> Drop for LoadGuard<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let generation = self.generation;
        let kind = self.kind;
        let cleared = self.state.send_if_modified(|s| match kind {
            LoadKind::Initial if s.loading_initial && s.generation == generation => {
                s.loading_initial = false;
                s.is_refreshing = false;
                true
            }
            LoadKind::More if s.loading_more => {
                s.loading_more = false;
                true
            }
            _ => false,
        });
        if cleared {
            debug!(?kind, "feed load dropped before completion");
        }
    }
}

// == Feed Loader ==
/// Incremental list loader over a `PageSource`.
///
/// At most one initial load and one load-more run at a time; extra
/// triggers are dropped, not queued. A refresh invalidates any load-more
/// still in flight so its page is never appended to the new list.
pub struct FeedLoader<T: FeedEntry> {
    source: Arc<dyn PageSource<T>>,
    config: FeedConfig,
    state: watch::Sender<FeedState<T>>,
    page_cache: Option<(SharedCache<FeedPage<T>>, String)>,
}

impl<T: FeedEntry> FeedLoader<T> {
    // == Constructor ==
    pub fn new(source: Arc<dyn PageSource<T>>, config: FeedConfig) -> Self {
        let (state, _) = watch::channel(FeedState::default());
        Self {
            source,
            config,
            state,
            page_cache: None,
        }
    }

    /// Keeps the first page in `cache` under `key`.
    ///
    /// A fresh cached page is shown while the initial load is in flight.
    pub fn with_page_cache(
        mut self,
        cache: SharedCache<FeedPage<T>>,
        key: impl Into<String>,
    ) -> Self {
        self.page_cache = Some((cache, key.into()));
        self
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    // == Load Initial ==
    /// Fetches the first page and replaces the list.
    ///
    /// A call made while another initial load is in flight is a no-op.
    /// Dropping the returned future cancels the request and frees the slot.
    pub async fn load_initial(&self) -> Result<()> {
        self.run_initial(false).await
    }

    // == Refresh ==
    /// Reloads from the first page. `show_spinner` only drives `is_refreshing`.
    pub async fn refresh(&self, show_spinner: bool) -> Result<()> {
        self.run_initial(show_spinner).await
    }

    async fn run_initial(&self, show_spinner: bool) -> Result<()> {
        let mut started = None;
        self.state.send_if_modified(|s| {
            if s.loading_initial {
                return false;
            }
            s.loading_initial = true;
            s.generation += 1;
            s.is_refreshing = show_spinner;
            s.error = None;
            started = Some(s.generation);
            true
        });
        let Some(generation) = started else {
            debug!("initial load already in flight");
            return Ok(());
        };
        let guard = LoadGuard::new(&self.state, LoadKind::Initial, generation);

        self.seed_from_cache().await;

        let request = self.request(None);
        let result = self.source.fetch_page(&request).await;

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "initial feed load failed");
                self.state.send_modify(|s| {
                    s.loading_initial = false;
                    s.is_refreshing = false;
                    s.error = Some(e.clone());
                });
                guard.settle();
                return Err(e);
            }
        };

        if let Some((cache, key)) = &self.page_cache {
            cache.write().await.set(key.clone(), page.clone(), None);
        }

        let (next_cursor, has_more) = self.next_position(None, &page);
        let mut count = 0;
        self.state.send_modify(|s| {
            s.items.clear();
            count = append_unique(&mut s.items, page.items);
            s.next_cursor = next_cursor;
            s.has_more = has_more;
            s.loaded = true;
            s.loading_initial = false;
            s.is_refreshing = false;
        });
        guard.settle();
        info!(items = count, has_more, "feed loaded");
        Ok(())
    }

    async fn seed_from_cache(&self) {
        let Some((cache, key)) = &self.page_cache else {
            return;
        };
        let Some(page) = cache.write().await.get(key) else {
            return;
        };

        let (next_cursor, has_more) = self.next_position(None, &page);
        self.state.send_if_modified(|s| {
            if !s.items.is_empty() {
                return false;
            }
            append_unique(&mut s.items, page.items);
            s.next_cursor = next_cursor;
            s.has_more = has_more;
            s.loaded = true;
            true
        });
        debug!(key = %key, "seeded feed from cached first page");
    }

    // == Load More ==
    /// Fetches the next page and appends unseen items.
    ///
    /// No-op when the feed is exhausted or any load is in flight. On
    /// failure the cursor and `has_more` are left as they were so the same
    /// page can be retried.
    pub async fn load_more(&self) -> Result<()> {
        let mut ticket = None;
        self.state.send_if_modified(|s| {
            if !s.has_more || s.loading_more || s.loading_initial {
                return false;
            }
            s.loading_more = true;
            s.error = None;
            ticket = Some((s.generation, s.next_cursor.clone()));
            true
        });
        let Some((generation, cursor)) = ticket else {
            return Ok(());
        };
        let guard = LoadGuard::new(&self.state, LoadKind::More, generation);

        let request = self.request(cursor);
        let result = self.source.fetch_page(&request).await;

        let mut outcome = Ok(());
        self.state.send_modify(|s| {
            s.loading_more = false;
            if s.generation != generation {
                debug!("discarding page from before refresh");
                return;
            }
            match result {
                Ok(page) => {
                    let (next_cursor, has_more) =
                        self.next_position(request.cursor.as_ref(), &page);
                    let added = append_unique(&mut s.items, page.items);
                    s.next_cursor = next_cursor;
                    s.has_more = has_more;
                    debug!(added, has_more, "feed page appended");
                }
                Err(e) => {
                    warn!(error = %e, "loading next feed page failed");
                    s.error = Some(e.clone());
                    outcome = Err(e);
                }
            }
        });
        guard.settle();
        outcome
    }

    // == On Sentinel Visible ==
    /// Intersection callback for the end-of-list sentinel.
    ///
    /// Debounced only by the in-flight guard, so a trigger right after a
    /// fast load is never lost.
    pub async fn on_sentinel_visible(&self) -> Result<()> {
        self.load_more().await
    }

    // == Item Access ==
    pub fn state(&self) -> FeedState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState<T>> {
        self.state.subscribe()
    }

    pub fn items(&self) -> Vec<T> {
        self.state.borrow().items.clone()
    }

    pub fn has_more(&self) -> bool {
        self.state.borrow().has_more
    }

    pub fn item(&self, id: &str) -> Option<T> {
        self.state
            .borrow()
            .items
            .iter()
            .find(|i| i.entry_id() == id)
            .cloned()
    }

    /// Applies `f` to the item with `id`. Returns false if it is not held.
    pub fn update_item(&self, id: &str, f: impl FnOnce(&mut T)) -> bool {
        self.state.send_if_modified(|s| {
            match s.items.iter_mut().find(|i| i.entry_id() == id) {
                Some(item) => {
                    f(item);
                    true
                }
                None => false,
            }
        })
    }

    /// Removes the item with `id`, returning it if it was held.
    pub fn remove_item(&self, id: &str) -> Option<T> {
        let mut removed = None;
        self.state.send_if_modified(|s| {
            match s.items.iter().position(|i| i.entry_id() == id) {
                Some(index) => {
                    removed = Some(s.items.remove(index));
                    true
                }
                None => false,
            }
        });
        removed
    }

    fn request(&self, cursor: Option<Cursor>) -> PageRequest {
        PageRequest {
            cursor,
            page_size: self.config.page_size,
            filters: self.config.filters.clone(),
        }
    }

    // == Next Position ==
    /// Derives the next cursor and `has_more` from a fetched page.
    ///
    /// A short page, an empty page, a server exhaustion flag or a missing
    /// cursor all end the feed.
    fn next_position(&self, requested: Option<&Cursor>, page: &FeedPage<T>) -> (Option<Cursor>, bool) {
        let fetched = page.items.len();
        let next_cursor = match self.config.mode {
            PaginationMode::Cursor => page.next_cursor.clone(),
            PaginationMode::Offset => {
                let base = match requested {
                    Some(Cursor::Offset(offset)) => *offset,
                    _ => 0,
                };
                Some(Cursor::Offset(base + fetched))
            }
        };
        let has_more = fetched > 0
            && fetched >= self.config.page_size
            && page.has_more
            && next_cursor.is_some();
        (next_cursor, has_more)
    }
}
