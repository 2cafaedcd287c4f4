//! Bookmark writes.

use std::fmt;
use std::sync::Arc;

use crate::backend::BookmarkService;
use crate::coordinator::UpdateSink;
use crate::error::Result;
use crate::model::{ContentChange, ContentSummary};
use crate::session::User;

#[derive(Clone)]
pub struct BookmarkTracker {
    user: User,
    service: Arc<dyn BookmarkService>,
    sink: UpdateSink,
}

impl fmt::Debug for BookmarkTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookmarkTracker")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl BookmarkTracker {
    #[must_use]
    pub fn new(user: User, service: Arc<dyn BookmarkService>, sink: UpdateSink) -> Self {
        Self {
            user,
            service,
            sink,
        }
    }

    /// # Errors
    ///
    /// Returns the backend error. Nothing is updated locally in that case.
    pub async fn add(&self, item: &ContentSummary) -> Result<ContentSummary> {
        self.set(item, true).await
    }

    /// # Errors
    ///
    /// Returns the backend error. Nothing is updated locally in that case.
    pub async fn remove(&self, item: &ContentSummary) -> Result<ContentSummary> {
        self.set(item, false).await
    }

    /// Flips the bookmark flag of `item`.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn toggle(&self, item: &ContentSummary) -> Result<ContentSummary> {
        self.set(item, !item.bookmarked).await
    }

    async fn set(&self, item: &ContentSummary, bookmarked: bool) -> Result<ContentSummary> {
        if bookmarked {
            self.service.add_bookmark(&self.user, item.id).await?;
        } else {
            self.service.remove_bookmark(&self.user, item.id).await?;
        }
        let mut updated = item.clone();
        updated.bookmarked = bookmarked;
        log::info!(
            "{} {}",
            if bookmarked { "Bookmarked" } else { "Removed bookmark for" },
            item.id
        );
        self.sink
            .content_changed(item.id, ContentChange::Bookmarked(bookmarked));
        Ok(updated)
    }
}
