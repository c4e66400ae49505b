//! Semurg feed reader
//!
//! Loads the post feed and the first page of facts from the hosted backend
//! and prints them as JSON lines.

use std::sync::Arc;

use anyhow::Context;
use semurg::cache::{self, SharedCache};
use semurg::feed::{Fact, FeedConfig, FeedLoader, FeedPage, FeedStore, Post};
use semurg::{spawn_cleanup_task, Config, RestBackend};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the feed reader.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the page cache and start the TTL cleanup task
/// 4. Load the configured number of feed pages and the first facts page
/// 5. Print posts and facts to stdout, or stop early on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "semurg=info", can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "semurg=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env();
    info!(
        "Configuration loaded: backend={}, page_size={}, pages={}, cache_max_entries={}",
        config.backend_url, config.feed_page_size, config.feed_pages, config.cache_max_entries
    );

    let backend = Arc::new(RestBackend::from_config(&config));
    let page_cache: SharedCache<FeedPage<Post>> =
        cache::shared(config.cache_max_entries, config.default_ttl());
    let cleanup_handle = spawn_cleanup_task(page_cache.clone(), config.cache_cleanup_interval);

    let loader = Arc::new(
        FeedLoader::<Post>::new(backend.clone(), FeedConfig::for_posts(&config))
            .with_page_cache(page_cache.clone(), "feed:posts"),
    );
    let store = FeedStore::new(loader.clone(), backend.clone(), config.session_user_id.clone());
    let facts = FeedLoader::<Fact>::new(backend, FeedConfig::for_facts(&config));

    let outcome = tokio::select! {
        result = async {
            tokio::try_join!(read_feed(&store, config.feed_pages), read_facts(&facts))
        } => result.map(|_| ()),
        _ = shutdown_signal() => Ok(()),
    };

    cleanup_handle.abort();
    outcome?;

    let posts = loader.items();
    for post in &posts {
        let line = serde_json::to_string(post).context("serializing post")?;
        println!("{line}");
    }
    for fact in facts.items() {
        let line = serde_json::to_string(&fact).context("serializing fact")?;
        println!("{line}");
    }

    let stats = page_cache.read().await.stats();
    match store.current_user().await {
        Some(user) => info!(
            posts = posts.len(),
            facts = facts.items().len(),
            liked = posts.iter().filter(|p| p.is_liked_by(&user)).count(),
            saved = posts.iter().filter(|p| p.is_saved_by(&user)).count(),
            user = %user,
            cache_hit_rate = stats.hit_rate(),
            "feed printed"
        ),
        None => info!(
            posts = posts.len(),
            facts = facts.items().len(),
            cache_hit_rate = stats.hit_rate(),
            "feed printed, signed out"
        ),
    }
    Ok(())
}

async fn read_feed(store: &FeedStore, pages: usize) -> anyhow::Result<()> {
    store
        .loader()
        .load_initial()
        .await
        .context("loading the first feed page")?;

    for _ in 1..pages {
        if !store.loader().has_more() {
            break;
        }
        store.load_more().await.context("loading more posts")?;
    }
    Ok(())
}

async fn read_facts(facts: &FeedLoader<Fact>) -> anyhow::Result<()> {
    facts.load_initial().await.context("loading facts")
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
