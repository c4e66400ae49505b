//! Stale-While-Revalidate Query
//!
//! Binds a cache key to a producer. Cached data is shown immediately; the
//! producer runs when the cache misses, when revalidation is on, or on an
//! explicit refetch. Only the most recent call may publish its result.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::cache::SharedCache;
use crate::config::Config;
use crate::error::{FeedError, Result};

type ProducerFuture<V> = Pin<Box<dyn Future<Output = Result<V>> + Send>>;
type Producer<V> = Arc<dyn Fn(String) -> ProducerFuture<V> + Send + Sync>;

// == Options ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwrOptions {
    /// Freshness window of results written to the cache
    pub ttl: Duration,
    /// Run the producer even after a fresh cache hit
    pub stale_while_revalidate: bool,
}

impl Default for SwrOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            stale_while_revalidate: false,
        }
    }
}

impl SwrOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ttl: config.default_ttl(),
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn revalidating(mut self) -> Self {
        self.stale_while_revalidate = true;
        self
    }
}

// == Query State ==
/// What a view renders: last good data, whether a call is running, and the
/// last failure.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<V> {
    pub data: Option<V>,
    pub loading: bool,
    pub error: Option<FeedError>,
}

impl<V> Default for QueryState<V> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }
}

struct Inner<V> {
    key: Mutex<String>,
    cache: SharedCache<V>,
    options: SwrOptions,
    producer: Producer<V>,
    state: watch::Sender<QueryState<V>>,
    generation: AtomicU64,
    running: Mutex<Option<AbortHandle>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<V> Inner<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Publishes a producer result unless a newer call superseded it.
    async fn commit(&self, generation: u64, key: String, result: Result<V>) -> Result<()> {
        if !self.is_current(generation) {
            debug!(%key, "discarding superseded result");
            return Ok(());
        }

        match result {
            Ok(data) => {
                let mut cache = self.cache.write().await;
                // A newer call may have committed while this one waited
                if !self.is_current(generation) {
                    debug!(%key, "discarding result superseded while awaiting the cache");
                    return Ok(());
                }
                cache.set(key, data.clone(), Some(self.options.ttl));
                drop(cache);
                self.state.send_if_modified(|s| {
                    if !self.is_current(generation) {
                        return false;
                    }
                    s.data = Some(data);
                    s.loading = false;
                    s.error = None;
                    true
                });
                Ok(())
            }
            Err(e) => {
                warn!(%key, error = %e, "fetch failed, keeping previous data");
                self.state.send_if_modified(|s| {
                    if !self.is_current(generation) {
                        return false;
                    }
                    s.loading = false;
                    s.error = Some(e.clone());
                    true
                });
                Err(e)
            }
        }
    }
}

// == SWR Query ==
/// Cached, revalidating view of one keyed remote value.
///
/// Clones share the same state, so a clone can refetch while another
/// awaits. Issuing a call aborts the one still running.
pub struct SwrQuery<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for SwrQuery<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> SwrQuery<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// # Arguments
    /// * `key` - Cache key the query starts on
    /// * `cache` - Shared cache results are read from and written to
    /// * `options` - TTL and revalidation behaviour
    /// * `producer` - Fetches the value for a key
    pub fn new<F, Fut>(
        key: impl Into<String>,
        cache: SharedCache<V>,
        options: SwrOptions,
        producer: F,
    ) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let producer: Producer<V> =
            Arc::new(move |key: String| -> ProducerFuture<V> { Box::pin(producer(key)) });
        let (state, _) = watch::channel(QueryState::default());
        Self {
            inner: Arc::new(Inner {
                key: Mutex::new(key.into()),
                cache,
                options,
                producer,
                state,
                generation: AtomicU64::new(0),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn key(&self) -> String {
        lock(&self.inner.key).clone()
    }

    pub fn state(&self) -> QueryState<V> {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState<V>> {
        self.inner.state.subscribe()
    }

    // == Load ==
    /// Shows cached data if fresh, then fetches on a miss or when
    /// revalidation is on.
    pub async fn load(&self) -> Result<()> {
        let key = self.key();
        let cached = self.inner.cache.write().await.get(&key);

        if let Some(data) = cached {
            self.inner.state.send_modify(|s| s.data = Some(data));
            if !self.inner.options.stale_while_revalidate {
                debug!(%key, "fresh cache hit");
                return Ok(());
            }
            debug!(%key, "fresh cache hit, revalidating");
        }

        self.fetch(key).await
    }

    // == Set Key ==
    /// Switches to another key: cancels the running call, clears the state
    /// and loads the new key.
    pub async fn set_key(&self, key: impl Into<String>) -> Result<()> {
        *lock(&self.inner.key) = key.into();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let running = lock(&self.inner.running).take();
        if let Some(running) = running {
            running.abort();
        }
        self.inner.state.send_replace(QueryState::default());
        self.load().await
    }

    // == Refetch ==
    /// Runs the producer regardless of the cache and writes the result through.
    pub async fn refetch(&self) -> Result<()> {
        self.fetch(self.key()).await
    }

    // == Invalidate ==
    /// Drops the cached entry without fetching. Published data stays.
    pub async fn invalidate(&self) -> bool {
        let key = self.key();
        self.inner.cache.write().await.invalidate(&key)
    }

    async fn fetch(&self, key: String) -> Result<()> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.state.send_modify(|s| s.loading = true);

        let request = (self.inner.producer)(key.clone());
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = request.await;
            inner.commit(generation, key, result).await
        });

        let previous = lock(&self.inner.running).replace(task.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
        }

        match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => {
                debug!("fetch superseded by a newer call");
                Ok(())
            }
            Err(e) => Err(FeedError::Internal(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Clone, Default)]
    struct Remote {
        calls: Arc<AtomicUsize>,
        failing: Arc<AtomicBool>,
    }

    impl Remote {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn query(&self, cache: SharedCache<String>, options: SwrOptions) -> SwrQuery<String> {
            let remote = self.clone();
            SwrQuery::new("species:owl", cache, options, move |key| {
                let remote = remote.clone();
                async move {
                    let n = remote.calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if remote.failing.load(Ordering::SeqCst) {
                        return Err(FeedError::Network("offline".into()));
                    }
                    Ok(format!("{key}#{n}"))
                }
            })
        }
    }

    fn cache() -> SharedCache<String> {
        cache::shared(16, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_miss_fetches_and_caches() {
        let remote = Remote::default();
        let cache = cache();
        let query = remote.query(cache.clone(), SwrOptions::default());

        query.load().await.unwrap();

        let state = query.state();
        assert_eq!(state.data.as_deref(), Some("species:owl#1"));
        assert!(!state.loading);
        assert_eq!(
            cache.write().await.get("species:owl").as_deref(),
            Some("species:owl#1")
        );
    }

    #[tokio::test]
    async fn test_fresh_hit_skips_producer() {
        let remote = Remote::default();
        let cache = cache();
        cache.write().await.set("species:owl", "cached".to_string(), None);
        let query = remote.query(cache, SwrOptions::default());

        query.load().await.unwrap();

        assert_eq!(query.state().data.as_deref(), Some("cached"));
        assert_eq!(remote.calls(), 0);
    }

    #[tokio::test]
    async fn test_revalidation_replaces_cached_data() {
        let remote = Remote::default();
        let cache = cache();
        cache.write().await.set("species:owl", "cached".to_string(), None);
        let query = remote.query(cache, SwrOptions::default().revalidating());
        let rx = query.subscribe();

        query.load().await.unwrap();

        assert_eq!(remote.calls(), 1);
        assert_eq!(rx.borrow().data.as_deref(), Some("species:owl#1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_refetched() {
        let remote = Remote::default();
        let query = remote.query(cache(), SwrOptions::default().with_ttl(Duration::from_secs(5)));

        query.load().await.unwrap();
        query.load().await.unwrap();
        assert_eq!(remote.calls(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        query.load().await.unwrap();
        assert_eq!(remote.calls(), 2);
        assert_eq!(query.state().data.as_deref(), Some("species:owl#2"));
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_data() {
        let remote = Remote::default();
        let query = remote.query(cache(), SwrOptions::default());
        query.load().await.unwrap();

        remote.failing.store(true, Ordering::SeqCst);
        let result = query.refetch().await;

        assert_eq!(result, Err(FeedError::Network("offline".into())));
        let state = query.state();
        assert_eq!(state.data.as_deref(), Some("species:owl#1"));
        assert_eq!(state.error, Some(FeedError::Network("offline".into())));
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_refetch_bypasses_fresh_cache() {
        let remote = Remote::default();
        let cache = cache();
        let query = remote.query(cache.clone(), SwrOptions::default());
        query.load().await.unwrap();

        query.refetch().await.unwrap();

        assert_eq!(remote.calls(), 2);
        assert_eq!(
            cache.write().await.get("species:owl").as_deref(),
            Some("species:owl#2")
        );
    }

    #[tokio::test]
    async fn test_invalidate_forces_next_load_to_fetch() {
        let remote = Remote::default();
        let query = remote.query(cache(), SwrOptions::default());
        query.load().await.unwrap();

        assert!(query.invalidate().await);
        assert_eq!(remote.calls(), 1);
        assert_eq!(query.state().data.as_deref(), Some("species:owl#1"));

        query.load().await.unwrap();
        assert_eq!(remote.calls(), 2);
    }

    #[tokio::test]
    async fn test_set_key_resets_state() {
        let remote = Remote::default();
        let query = remote.query(cache(), SwrOptions::default());
        query.load().await.unwrap();

        query.set_key("species:fox").await.unwrap();

        assert_eq!(query.key(), "species:fox");
        assert_eq!(query.state().data.as_deref(), Some("species:fox#2"));
    }

    #[tokio::test]
    async fn test_result_superseded_while_awaiting_cache_is_not_written() {
        let cache = cache();
        let query = Remote::default().query(cache.clone(), SwrOptions::default());
        let inner = Arc::clone(&query.inner);
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let held = cache.write().await;
        let commit = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                inner
                    .commit(generation, "species:owl".into(), Ok("stale".into()))
                    .await
            })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        inner.generation.fetch_add(1, Ordering::SeqCst);
        drop(held);

        assert_eq!(commit.await.unwrap(), Ok(()));
        assert_eq!(cache.write().await.get("species:owl"), None);
        assert_eq!(query.state().data, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_call_wins_and_older_is_cancelled() {
        struct DropFlag(Arc<AtomicBool>);

        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let slow_dropped = Arc::new(AtomicBool::new(false));
        let query = {
            let calls = Arc::clone(&calls);
            let slow_dropped = Arc::clone(&slow_dropped);
            SwrQuery::new("k", cache(), SwrOptions::default(), move |_key| {
                let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
                let flag = first.then(|| DropFlag(Arc::clone(&slow_dropped)));
                async move {
                    let _flag = flag;
                    let (delay, value) = if first { (100, "slow") } else { (10, "fast") };
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok::<_, FeedError>(value.to_string())
                }
            })
        };

        let second = query.clone();
        let (first, latest) = tokio::join!(query.refetch(), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            second.refetch().await
        });

        assert_eq!(first, Ok(()));
        assert_eq!(latest, Ok(()));
        assert!(slow_dropped.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(query.state().data.as_deref(), Some("fast"));
    }
}
