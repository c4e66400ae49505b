//! Backend Module
//!
//! The remote collaborator behind every feed: page reads, row mutations,
//! notifications and species identification.
//!
//! # Implementations
//! - `RestBackend`: hosted PostgREST-style backend over HTTP
//! - `MemoryBackend`: in-process backend for tests and local development

mod memory;
mod rest;

use async_trait::async_trait;

use crate::error::Result;
use crate::feed::{Comment, FeedPage, Notification, PageRequest, PostUpdate};
use crate::identify::SpeciesRecord;

pub use memory::{MemoryBackend, Op};
pub use rest::RestBackend;

/// Produces pages of one feed.
#[async_trait]
pub trait PageSource<T>: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<FeedPage<T>>;
}

/// Row-level mutations on posts.
#[async_trait]
pub trait PostBackend: Send + Sync {
    async fn like(&self, post_id: &str, user_id: &str) -> Result<()>;

    async fn unlike(&self, post_id: &str, user_id: &str) -> Result<()>;

    async fn save(&self, post_id: &str, user_id: &str) -> Result<()>;

    async fn unsave(&self, post_id: &str, user_id: &str) -> Result<()>;

    /// Inserts a comment and returns the stored row.
    async fn insert_comment(&self, post_id: &str, user_id: &str, text: &str) -> Result<Comment>;

    async fn update_post(&self, post_id: &str, update: &PostUpdate) -> Result<()>;

    async fn delete_post(&self, post_id: &str) -> Result<()>;

    async fn create_notification(&self, notification: &Notification) -> Result<()>;
}

/// Vision API: image bytes in, species record out. Slow and fallible.
#[async_trait]
pub trait SpeciesIdentifier: Send + Sync {
    async fn identify(&self, image: &[u8]) -> Result<SpeciesRecord>;
}
