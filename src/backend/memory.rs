//! In-Memory Backend
//!
//! Process-local stand-in for the hosted backend, used by tests and for
//! local development. Supports per-operation failure injection, call
//! counting and artificial latency.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::backend::{PageSource, PostBackend, SpeciesIdentifier};
use crate::error::{FeedError, Result};
use crate::feed::{
    Comment, Cursor, Fact, FeedPage, Keyset, Notification, PageRequest, Post, PostUpdate,
};
use crate::identify::SpeciesRecord;

/// Backend operations, for counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    FetchPosts,
    FetchFacts,
    Like,
    Unlike,
    Save,
    Unsave,
    Comment,
    UpdatePost,
    DeletePost,
    Notify,
    Identify,
}

#[derive(Default)]
struct Data {
    posts: Vec<Post>,
    facts: Vec<Fact>,
    notifications: Vec<Notification>,
    species: Option<SpeciesRecord>,
    next_comment_id: u64,
}

#[derive(Default)]
struct Inner {
    data: Mutex<Data>,
    calls: Mutex<HashMap<Op, usize>>,
    failing: Mutex<HashSet<Op>>,
    latency: Mutex<Option<Duration>>,
}

// == Memory Backend ==
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_posts(self, posts: Vec<Post>) -> Self {
        lock(&self.inner.data).posts = posts;
        self
    }

    pub fn with_facts(self, facts: Vec<Fact>) -> Self {
        lock(&self.inner.data).facts = facts;
        self
    }

    /// Record returned by `identify`; without one, identification is rejected.
    pub fn with_species(self, record: SpeciesRecord) -> Self {
        lock(&self.inner.data).species = Some(record);
        self
    }

    pub fn insert_post(&self, post: Post) {
        lock(&self.inner.data).posts.push(post);
    }

    /// Remote copy of a post.
    pub fn post(&self, id: &str) -> Option<Post> {
        lock(&self.inner.data)
            .posts
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.inner.data).notifications.clone()
    }

    /// Number of times `op` was invoked, including failed calls.
    pub fn calls(&self, op: Op) -> usize {
        lock(&self.inner.calls).get(&op).copied().unwrap_or(0)
    }

    /// Makes every following `op` call fail with a network error.
    pub fn fail(&self, op: Op) {
        lock(&self.inner.failing).insert(op);
    }

    pub fn recover(&self, op: Op) {
        lock(&self.inner.failing).remove(&op);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.inner.latency) = Some(latency);
    }

    async fn enter(&self, op: Op) -> Result<()> {
        *lock(&self.inner.calls).entry(op).or_default() += 1;

        let latency = *lock(&self.inner.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if lock(&self.inner.failing).contains(&op) {
            debug!(?op, "injected failure");
            return Err(FeedError::Network(format!("injected failure: {op:?}")));
        }
        Ok(())
    }

    fn with_post<R>(&self, post_id: &str, f: impl FnOnce(&mut Post) -> R) -> Result<R> {
        let mut data = lock(&self.inner.data);
        data.posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .map(f)
            .ok_or_else(|| FeedError::NotFound(post_id.to_string()))
    }
}

// == Pagination ==
/// Newest-first page over `items`, following the request's cursor.
fn paginate<T: Clone>(
    mut items: Vec<T>,
    request: &PageRequest,
    keyset: fn(&T) -> Keyset,
) -> Result<FeedPage<T>> {
    items.sort_by(|a, b| keyset(b).cmp(&keyset(a)));

    let remaining: Vec<T> = match &request.cursor {
        None => items,
        Some(Cursor::Offset(offset)) => items.into_iter().skip(*offset).collect(),
        Some(Cursor::Token(token)) => {
            let last = Keyset::parse(token)?;
            items
                .into_iter()
                .filter(|item| keyset(item) < last)
                .collect()
        }
    };

    let has_more = remaining.len() > request.page_size;
    let page: Vec<T> = remaining.into_iter().take(request.page_size).collect();
    let next_cursor = match &request.cursor {
        Some(Cursor::Offset(offset)) => Some(Cursor::Offset(offset + page.len())),
        _ => page
            .last()
            .map(|last| Cursor::Token(keyset(last).token())),
    };

    Ok(FeedPage {
        items: page,
        next_cursor,
        has_more,
    })
}

#[async_trait]
impl PageSource<Post> for MemoryBackend {
    async fn fetch_page(&self, request: &PageRequest) -> Result<FeedPage<Post>> {
        self.enter(Op::FetchPosts).await?;
        let posts: Vec<Post> = lock(&self.inner.data)
            .posts
            .iter()
            .filter(|post| {
                request.filters.iter().all(|(column, value)| match column.as_str() {
                    "author_id" => &post.author_id == value,
                    "species" => post.species.as_ref() == Some(value),
                    _ => true,
                })
            })
            .cloned()
            .collect();
        paginate(posts, request, Post::keyset)
    }
}

#[async_trait]
impl PageSource<Fact> for MemoryBackend {
    async fn fetch_page(&self, request: &PageRequest) -> Result<FeedPage<Fact>> {
        self.enter(Op::FetchFacts).await?;
        let facts: Vec<Fact> = lock(&self.inner.data)
            .facts
            .iter()
            .filter(|fact| match request.filters.get("category") {
                Some(category) => fact.category.as_ref() == Some(category),
                None => true,
            })
            .cloned()
            .collect();
        paginate(facts, request, Fact::keyset)
    }
}

#[async_trait]
impl PostBackend for MemoryBackend {
    async fn like(&self, post_id: &str, user_id: &str) -> Result<()> {
        self.enter(Op::Like).await?;
        self.with_post(post_id, |p| p.set_liked(user_id, true))
    }

    async fn unlike(&self, post_id: &str, user_id: &str) -> Result<()> {
        self.enter(Op::Unlike).await?;
        self.with_post(post_id, |p| p.set_liked(user_id, false))
    }

    async fn save(&self, post_id: &str, user_id: &str) -> Result<()> {
        self.enter(Op::Save).await?;
        self.with_post(post_id, |p| p.set_saved(user_id, true))
    }

    async fn unsave(&self, post_id: &str, user_id: &str) -> Result<()> {
        self.enter(Op::Unsave).await?;
        self.with_post(post_id, |p| p.set_saved(user_id, false))
    }

    async fn insert_comment(&self, post_id: &str, user_id: &str, text: &str) -> Result<Comment> {
        self.enter(Op::Comment).await?;
        let id = {
            let mut data = lock(&self.inner.data);
            data.next_comment_id += 1;
            format!("c{}", data.next_comment_id)
        };
        let comment = Comment {
            id,
            post_id: post_id.to_string(),
            author_id: user_id.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        };
        let stored = comment.clone();
        self.with_post(post_id, move |p| p.comments.push(stored))?;
        Ok(comment)
    }

    async fn update_post(&self, post_id: &str, update: &PostUpdate) -> Result<()> {
        self.enter(Op::UpdatePost).await?;
        self.with_post(post_id, |p| update.apply_to(p))
    }

    async fn delete_post(&self, post_id: &str) -> Result<()> {
        self.enter(Op::DeletePost).await?;
        let mut data = lock(&self.inner.data);
        let before = data.posts.len();
        data.posts.retain(|p| p.id != post_id);
        if data.posts.len() == before {
            return Err(FeedError::NotFound(post_id.to_string()));
        }
        Ok(())
    }

    async fn create_notification(&self, notification: &Notification) -> Result<()> {
        self.enter(Op::Notify).await?;
        lock(&self.inner.data)
            .notifications
            .push(notification.clone());
        Ok(())
    }
}

#[async_trait]
impl SpeciesIdentifier for MemoryBackend {
    async fn identify(&self, _image: &[u8]) -> Result<SpeciesRecord> {
        self.enter(Op::Identify).await?;
        lock(&self.inner.data)
            .species
            .clone()
            .ok_or_else(|| FeedError::Rejected("no species detected".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn post(id: &str, author: &str, minute: u32) -> Post {
        Post {
            id: id.into(),
            author_id: author.into(),
            author_name: None,
            title: format!("Post {id}"),
            description: None,
            image_url: None,
            caption: None,
            species: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
            likes: BTreeSet::new(),
            saves: BTreeSet::new(),
            comments: vec![],
        }
    }

    fn backend() -> MemoryBackend {
        MemoryBackend::new().with_posts(vec![
            post("p1", "alice", 1),
            post("p2", "bob", 2),
            post("p3", "alice", 3),
        ])
    }

    fn ids(page: &FeedPage<Post>) -> Vec<&str> {
        page.items.iter().map(|p| p.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_pages_are_newest_first_and_follow_cursor() {
        let backend = backend();

        let first = backend.fetch_page(&PageRequest::first(2)).await.unwrap();
        assert_eq!(ids(&first), vec!["p3", "p2"]);
        assert!(first.has_more);

        let second = backend
            .fetch_page(&PageRequest {
                cursor: first.next_cursor.clone(),
                ..PageRequest::first(2)
            })
            .await
            .unwrap();
        assert_eq!(ids(&second), vec!["p1"]);
        assert!(!second.has_more);
    }

    #[tokio::test]
    async fn test_same_timestamp_rows_are_not_skipped_between_pages() {
        let backend = MemoryBackend::new().with_posts(vec![
            post("p1", "alice", 5),
            post("p2", "bob", 5),
            post("p3", "alice", 5),
            post("p4", "bob", 4),
        ]);

        let first = backend.fetch_page(&PageRequest::first(2)).await.unwrap();
        assert_eq!(ids(&first), vec!["p3", "p2"]);

        let second = backend
            .fetch_page(&PageRequest {
                cursor: first.next_cursor.clone(),
                ..PageRequest::first(2)
            })
            .await
            .unwrap();
        assert_eq!(ids(&second), vec!["p1", "p4"]);
        assert!(!second.has_more);
    }

    #[tokio::test]
    async fn test_offset_pages() {
        let backend = backend();
        let page = backend
            .fetch_page(&PageRequest {
                cursor: Some(Cursor::Offset(1)),
                ..PageRequest::first(1)
            })
            .await
            .unwrap();
        assert_eq!(ids(&page), vec!["p2"]);
        assert_eq!(page.next_cursor, Some(Cursor::Offset(2)));
    }

    #[tokio::test]
    async fn test_author_filter() {
        let backend = backend();
        let mut request = PageRequest::first(10);
        request.filters.insert("author_id".into(), "alice".into());

        let page = backend.fetch_page(&request).await.unwrap();
        assert_eq!(ids(&page), vec!["p3", "p1"]);
    }

    #[tokio::test]
    async fn test_failure_injection_and_counters() {
        let backend = backend();
        backend.fail(Op::Like);

        assert!(backend.like("p1", "bob").await.is_err());
        assert!(!backend.post("p1").unwrap().is_liked_by("bob"));

        backend.recover(Op::Like);
        backend.like("p1", "bob").await.unwrap();
        assert!(backend.post("p1").unwrap().is_liked_by("bob"));
        assert_eq!(backend.calls(Op::Like), 2);
    }

    #[tokio::test]
    async fn test_missing_post_is_not_found() {
        let backend = backend();
        assert_eq!(
            backend.delete_post("nope").await,
            Err(FeedError::NotFound("nope".into()))
        );
        assert!(backend.insert_comment("nope", "bob", "hi").await.is_err());
    }

    #[tokio::test]
    async fn test_identify_without_species_is_rejected() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.identify(b"jpeg").await,
            Err(FeedError::Rejected(_))
        ));
    }
}
