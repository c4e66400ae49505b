//! Optimistic Mutation Helper
//!
//! Applies a local change before the remote call and reverts it if the call
//! fails or is cancelled.

use std::future::Future;

use tracing::warn;

use crate::error::{FeedError, Result};
use crate::feed::{FeedEntry, FeedLoader};

// == Rollback ==
/// Pending revert of one applied change.
///
/// Runs the revert when dropped unless `confirm` was called, so a
/// cancelled remote call leaves the item as it was before `apply`.
struct Rollback<'a, T: FeedEntry, R: FnOnce(&mut T)> {
    loader: &'a FeedLoader<T>,
    id: &'a str,
    revert: Option<R>,
}

impl<T: FeedEntry, R: FnOnce(&mut T)> Rollback<'_, T, R> {
    fn confirm(mut self) {
        self.revert = None;
    }
}

impl<T: FeedEntry, R: FnOnce(&mut T)> Drop for Rollback<'_, T, R> {
    fn drop(&mut self) {
        let Some(revert) = self.revert.take() else {
            return;
        };
        if !self.loader.update_item(self.id, revert) {
            warn!(item = self.id, "item vanished before rollback");
        }
    }
}

// == Run ==
/// Applies `apply` to the item, awaits `remote`, and runs `revert` on failure.
///
/// `apply` runs synchronously before `remote` is first polled, so the UI
/// never sees an in-between state. `revert` must be the exact inverse of
/// `apply`. It also runs if this future is dropped before `remote`
/// resolves. Returns `NotFound` without touching `remote` when the item is
/// not held locally.
pub async fn run<T, A, R, Fut>(
    loader: &FeedLoader<T>,
    id: &str,
    apply: A,
    revert: R,
    remote: Fut,
) -> Result<()>
where
    T: FeedEntry,
    A: FnOnce(&mut T),
    R: FnOnce(&mut T),
    Fut: Future<Output = Result<()>>,
{
    if !loader.update_item(id, apply) {
        return Err(FeedError::NotFound(id.to_string()));
    }
    let rollback = Rollback {
        loader,
        id,
        revert: Some(revert),
    };

    match remote.await {
        Ok(()) => {
            rollback.confirm();
            Ok(())
        }
        Err(e) => {
            warn!(item = id, error = %e, "remote rejected optimistic change, rolling back");
            drop(rollback);
            Err(e)
        }
    }
}
