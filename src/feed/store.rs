//! Post Feed Store
//!
//! Wraps the post feed loader with like/save/comment/edit/delete actions,
//! reconciling local state against the backend.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::backend::PostBackend;
use crate::error::{FeedError, Result};
use crate::feed::{optimistic, Comment, FeedLoader, Notification, NotificationKind, Post, PostUpdate, UserId};

const EVENT_CAPACITY: usize = 32;

// == Feed Event ==
/// User-facing notices raised by feed actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// An action needs a signed-in user
    SignInRequired,
    /// An action failed; `retryable` marks transient network failures
    Error { message: String, retryable: bool },
}

// == In-Flight Marker ==
/// Holds a post id in the in-flight set until dropped, including when the
/// submitting future is cancelled.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a Mutex<HashSet<String>>, key: &str) -> Option<Self> {
        if lock(set).insert(key.to_string()) {
            Some(Self {
                set,
                key: key.to_string(),
            })
        } else {
            None
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// == Feed Store ==
/// Post feed with optimistic likes/saves and confirmed edits.
///
/// Likes and saves flip locally first and roll back if the backend
/// refuses. Comments, edits and deletes touch local state only after the
/// backend confirms.
pub struct FeedStore {
    loader: Arc<FeedLoader<Post>>,
    backend: Arc<dyn PostBackend>,
    user: RwLock<Option<UserId>>,
    commenting: Mutex<HashSet<String>>,
    events: broadcast::Sender<FeedEvent>,
}

impl FeedStore {
    // == Constructor ==
    pub fn new(
        loader: Arc<FeedLoader<Post>>,
        backend: Arc<dyn PostBackend>,
        user: Option<UserId>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            loader,
            backend,
            user: RwLock::new(user),
            commenting: Mutex::new(HashSet::new()),
            events,
        }
    }

    pub fn loader(&self) -> &Arc<FeedLoader<Post>> {
        &self.loader
    }

    /// Subscribes to user-facing notices.
    pub fn events(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    pub async fn set_user(&self, user: Option<UserId>) {
        *self.user.write().await = user;
    }

    pub async fn current_user(&self) -> Option<UserId> {
        self.user.read().await.clone()
    }

    // == Paging ==
    /// Loads the next page, raising an event if it fails.
    pub async fn load_more(&self) -> Result<()> {
        self.loader.load_more().await.map_err(|e| self.surface(e))
    }

    /// Reloads from the first page, raising an event if it fails.
    pub async fn refresh(&self, show_spinner: bool) -> Result<()> {
        self.loader
            .refresh(show_spinner)
            .await
            .map_err(|e| self.surface(e))
    }

    // == Like ==
    /// Toggles the current user's like on `post_id`.
    pub async fn like(&self, post_id: &str) -> Result<()> {
        let user = self.require_user().await?;
        let Some(post) = self.held(post_id) else {
            return Ok(());
        };

        let liked = post.is_liked_by(&user);
        let remote = async {
            if liked {
                self.backend.unlike(post_id, &user).await
            } else {
                self.backend.like(post_id, &user).await
            }
        };

        let result = optimistic::run(
            self.loader.as_ref(),
            post_id,
            |p| p.set_liked(&user, !liked),
            |p| p.set_liked(&user, liked),
            remote,
        )
        .await;

        match result {
            Ok(()) => {
                if !liked {
                    self.notify_author(&post, &user, NotificationKind::Like);
                }
                Ok(())
            }
            Err(FeedError::NotFound(_)) => Ok(()),
            Err(e) => Err(self.surface(e)),
        }
    }

    // == Save ==
    /// Toggles whether the current user saved `post_id`.
    pub async fn save(&self, post_id: &str) -> Result<()> {
        let user = self.require_user().await?;
        let Some(post) = self.held(post_id) else {
            return Ok(());
        };

        let saved = post.is_saved_by(&user);
        let remote = async {
            if saved {
                self.backend.unsave(post_id, &user).await
            } else {
                self.backend.save(post_id, &user).await
            }
        };

        let result = optimistic::run(
            self.loader.as_ref(),
            post_id,
            |p| p.set_saved(&user, !saved),
            |p| p.set_saved(&user, saved),
            remote,
        )
        .await;

        match result {
            Ok(()) | Err(FeedError::NotFound(_)) => Ok(()),
            Err(e) => Err(self.surface(e)),
        }
    }

    // == Comment ==
    /// Posts a comment and appends it once the backend confirms.
    ///
    /// Returns `Ok(None)` when a submission for the same post is already in
    /// flight or the post is not held locally.
    pub async fn comment(&self, post_id: &str, text: &str) -> Result<Option<Comment>> {
        let user = self.require_user().await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(FeedError::InvalidInput("comment is empty".to_string()));
        }
        let Some(post) = self.held(post_id) else {
            return Ok(None);
        };

        let Some(_in_flight) = InFlight::claim(&self.commenting, post_id) else {
            debug!(post = post_id, "comment already in flight, ignoring");
            return Ok(None);
        };
        let result = self.backend.insert_comment(post_id, &user, text).await;

        match result {
            Ok(comment) => {
                let appended = comment.clone();
                self.loader
                    .update_item(post_id, move |p| p.comments.push(appended));
                self.notify_author(&post, &user, NotificationKind::Comment);
                Ok(Some(comment))
            }
            Err(e) => Err(self.surface(e)),
        }
    }

    // == Edit ==
    /// Applies `update` remotely, then locally.
    pub async fn edit(&self, post_id: &str, update: PostUpdate) -> Result<()> {
        self.require_user().await?;
        if update.is_empty() {
            return Ok(());
        }
        if self.held(post_id).is_none() {
            return Ok(());
        }

        if let Err(e) = self.backend.update_post(post_id, &update).await {
            return Err(self.surface(e));
        }
        self.loader.update_item(post_id, |p| update.apply_to(p));
        info!(post = post_id, "post edited");
        Ok(())
    }

    // == Delete ==
    /// Deletes remotely, then drops the post from the list.
    pub async fn delete(&self, post_id: &str) -> Result<()> {
        self.require_user().await?;
        if self.held(post_id).is_none() {
            return Ok(());
        }

        if let Err(e) = self.backend.delete_post(post_id).await {
            return Err(self.surface(e));
        }
        self.loader.remove_item(post_id);
        info!(post = post_id, "post deleted");
        Ok(())
    }

    async fn require_user(&self) -> Result<UserId> {
        match self.current_user().await {
            Some(user) => Ok(user),
            None => {
                let _ = self.events.send(FeedEvent::SignInRequired);
                Err(FeedError::Unauthenticated)
            }
        }
    }

    fn held(&self, post_id: &str) -> Option<Post> {
        let post = self.loader.item(post_id);
        if post.is_none() {
            warn!(post = post_id, "action on post not held locally, ignoring");
        }
        post
    }

    fn surface(&self, err: FeedError) -> FeedError {
        let event = match &err {
            FeedError::Unauthenticated => FeedEvent::SignInRequired,
            other => FeedEvent::Error {
                message: other.to_string(),
                retryable: other.is_retryable(),
            },
        };
        let _ = self.events.send(event);
        err
    }

    // == Notify Author ==
    /// Fire-and-forget notification; failures are logged only.
    fn notify_author(&self, post: &Post, actor: &str, kind: NotificationKind) {
        if post.author_id == actor {
            return;
        }
        let notification = Notification {
            recipient_id: post.author_id.clone(),
            actor_id: actor.to_string(),
            post_id: post.id.clone(),
            kind,
        };
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            if let Err(e) = backend.create_notification(&notification).await {
                warn!(post = %notification.post_id, error = %e, "notification failed");
            }
        });
    }
}
