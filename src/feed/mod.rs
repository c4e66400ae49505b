//! Feed Module
//!
//! Paginated feeds and the post store built on top of them.
//!
//! # Components
//! - `model`: posts, facts, comments and page types
//! - `loader`: generic paginated loader with de-duplication
//! - `optimistic`: apply-then-confirm helper for list items
//! - `store`: post actions (like, save, comment, edit, delete)

mod loader;
mod model;
pub mod optimistic;
mod store;

pub use loader::{append_unique, FeedConfig, FeedLoader, FeedPhase, FeedState, PaginationMode};
pub use model::{
    Comment, Cursor, Fact, FeedEntry, FeedPage, Keyset, Notification, NotificationKind, PageRequest,
    Post, PostUpdate, UserId,
};
pub use store::{FeedEvent, FeedStore};
