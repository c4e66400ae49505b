//! Feed Models
//!
//! Posts, comments, facts and the page/cursor types shared by every feed.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FeedError, Result};

/// Identifier of a user as assigned by the backend.
pub type UserId = String;

// == Feed Entry ==
/// Anything a paginated feed can hold.
///
/// Ids are assigned remotely and must be unique within one feed.
pub trait FeedEntry: Clone + Send + Sync + 'static {
    fn entry_id(&self) -> &str;
}

// == Comment ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// == Post ==
/// A shared sighting: photo, identification and social state.
///
/// `likes` and `saves` hold user ids; whether the current user liked or
/// saved the post is derived from membership and never sent back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author_id: UserId,
    #[serde(default)]
    pub author_name: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub species: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub likes: BTreeSet<UserId>,
    #[serde(default)]
    pub saves: BTreeSet<UserId>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Post {
    pub fn is_liked_by(&self, user: &str) -> bool {
        self.likes.contains(user)
    }

    pub fn is_saved_by(&self, user: &str) -> bool {
        self.saves.contains(user)
    }

    pub fn like_count(&self) -> usize {
        self.likes.len()
    }

    pub fn comment_count(&self) -> usize {
        self.comments.len()
    }

    // == Set Liked ==
    /// Adds or removes `user` from the likes. Applying the opposite value
    /// undoes the change exactly.
    pub fn set_liked(&mut self, user: &str, liked: bool) {
        if liked {
            self.likes.insert(user.to_string());
        } else {
            self.likes.remove(user);
        }
    }

    pub fn set_saved(&mut self, user: &str, saved: bool) {
        if saved {
            self.saves.insert(user.to_string());
        } else {
            self.saves.remove(user);
        }
    }
}

impl FeedEntry for Post {
    fn entry_id(&self) -> &str {
        &self.id
    }
}

impl Post {
    pub fn keyset(&self) -> Keyset {
        Keyset::new(self.created_at, &self.id)
    }
}

// == Post Update ==
/// Author edits; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl PostUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.caption.is_none()
    }

    pub fn apply_to(&self, post: &mut Post) {
        if let Some(title) = &self.title {
            post.title = title.clone();
        }
        if let Some(description) = &self.description {
            post.description = Some(description.clone());
        }
        if let Some(caption) = &self.caption {
            post.caption = Some(caption.clone());
        }
    }
}

// == Fact ==
/// An entry of the educational facts feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FeedEntry for Fact {
    fn entry_id(&self) -> &str {
        &self.id
    }
}

impl Fact {
    pub fn keyset(&self) -> Keyset {
        Keyset::new(self.created_at, &self.id)
    }
}

// == Notification ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Comment,
}

/// Sent to a post author when someone else likes or comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient_id: UserId,
    pub actor_id: UserId,
    pub post_id: String,
    pub kind: NotificationKind,
}

// == Pagination ==
/// Position of the next page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cursor {
    /// Opaque server token, typically the last item's `Keyset`
    Token(String),
    /// Number of items already fetched
    Offset(usize),
}

// == Keyset ==
/// Sort position of a row in a newest-first listing.
///
/// Rows order by `created_at`, then by id, so rows sharing a timestamp
/// still have a strict order and none is skipped at a page boundary.
/// Encoded in `Cursor::Token` as `<rfc3339>|<id>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Keyset {
    pub created_at: DateTime<Utc>,
    /// Empty for timestamp-only tokens; then every row at `created_at` is past
    pub id: String,
}

impl Keyset {
    pub fn new(created_at: DateTime<Utc>, id: impl Into<String>) -> Self {
        Self {
            created_at,
            id: id.into(),
        }
    }

    pub fn token(&self) -> String {
        if self.id.is_empty() {
            self.created_at.to_rfc3339()
        } else {
            format!("{}|{}", self.created_at.to_rfc3339(), self.id)
        }
    }

    /// Parses `<rfc3339>|<id>` or a bare timestamp.
    pub fn parse(token: &str) -> Result<Self> {
        let (timestamp, id) = token.split_once('|').unwrap_or((token, ""));
        let created_at = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|e| FeedError::InvalidInput(format!("bad cursor {token}: {e}")))?
            .with_timezone(&Utc);
        Ok(Self::new(created_at, id))
    }
}

/// Arguments of one page fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// `None` fetches the first page
    pub cursor: Option<Cursor>,
    pub page_size: usize,
    /// Equality filters, column -> value
    pub filters: BTreeMap<String, String>,
}

impl PageRequest {
    pub fn first(page_size: usize) -> Self {
        Self {
            cursor: None,
            page_size,
            filters: BTreeMap::new(),
        }
    }
}

/// One page as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Cursor>,
    pub has_more: bool,
}

impl<T> FeedPage<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }
}
