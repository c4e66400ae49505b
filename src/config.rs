//! Configuration Module
//!
//! Handles loading feed engine configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Feed engine configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of entries each cache instance can hold
    pub cache_max_entries: usize,
    /// Default TTL in seconds for cache entries without explicit TTL
    pub cache_default_ttl: u64,
    /// Background cleanup task interval in seconds
    pub cache_cleanup_interval: u64,
    /// Posts requested per page
    pub feed_page_size: usize,
    /// Facts requested per page
    pub facts_page_size: usize,
    /// Number of per-view scroll offsets retained
    pub scroll_slots: usize,
    /// How long scroll events are ignored after a programmatic restore, in ms
    pub scroll_restore_lock_ms: u64,
    /// Base URL of the hosted backend
    pub backend_url: String,
    /// Project API key sent as the `apikey` header
    pub backend_api_key: Option<String>,
    /// User access token sent as the bearer token
    pub backend_access_token: Option<String>,
    /// Signed-in user, if any
    pub session_user_id: Option<String>,
    /// Pages the binary fetches before exiting
    pub feed_pages: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_ENTRIES` - Maximum cache entries (default: 200)
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `CACHE_CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 30)
    /// - `FEED_PAGE_SIZE` - Posts per page (default: 10)
    /// - `FACTS_PAGE_SIZE` - Facts per page (default: 20)
    /// - `SCROLL_SLOTS` - Remembered scroll offsets (default: 16)
    /// - `SCROLL_RESTORE_LOCK_MS` - Restore re-entrancy lock (default: 100)
    /// - `BACKEND_URL` - Hosted backend base URL (default: http://localhost:54321)
    /// - `BACKEND_API_KEY`, `BACKEND_ACCESS_TOKEN`, `SESSION_USER_ID` - optional
    /// - `FEED_PAGES` - Pages fetched by the binary (default: 1)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_max_entries: parse_var("CACHE_MAX_ENTRIES", defaults.cache_max_entries),
            cache_default_ttl: parse_var("CACHE_DEFAULT_TTL", defaults.cache_default_ttl),
            cache_cleanup_interval: parse_var(
                "CACHE_CLEANUP_INTERVAL",
                defaults.cache_cleanup_interval,
            ),
            feed_page_size: parse_var("FEED_PAGE_SIZE", defaults.feed_page_size),
            facts_page_size: parse_var("FACTS_PAGE_SIZE", defaults.facts_page_size),
            scroll_slots: parse_var("SCROLL_SLOTS", defaults.scroll_slots),
            scroll_restore_lock_ms: parse_var(
                "SCROLL_RESTORE_LOCK_MS",
                defaults.scroll_restore_lock_ms,
            ),
            backend_url: env::var("BACKEND_URL").unwrap_or(defaults.backend_url),
            backend_api_key: optional_var("BACKEND_API_KEY"),
            backend_access_token: optional_var("BACKEND_ACCESS_TOKEN"),
            session_user_id: optional_var("SESSION_USER_ID"),
            feed_pages: parse_var("FEED_PAGES", defaults.feed_pages),
        }
    }

    /// Default cache TTL as a Duration.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_default_ttl)
    }

    /// Scroll restore lock as a Duration.
    pub fn scroll_restore_lock(&self) -> Duration {
        Duration::from_millis(self.scroll_restore_lock_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_max_entries: 200,
            cache_default_ttl: 300,
            cache_cleanup_interval: 30,
            feed_page_size: 10,
            facts_page_size: 20,
            scroll_slots: 16,
            scroll_restore_lock_ms: 100,
            backend_url: "http://localhost:54321".to_string(),
            backend_api_key: None,
            backend_access_token: None,
            session_user_id: None,
            feed_pages: 1,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
