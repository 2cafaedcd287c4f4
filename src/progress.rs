//! Watch-progress writes.

use std::fmt;
use std::sync::Arc;

use crate::backend::ProgressService;
use crate::coordinator::UpdateSink;
use crate::error::Result;
use crate::model::{CompletionStatus, ContentChange, ContentSummary};
use crate::session::User;

/// Records completion state for content items and announces confirmed
/// changes to the session.
#[derive(Clone)]
pub struct ProgressTracker {
    user: User,
    service: Arc<dyn ProgressService>,
    sink: UpdateSink,
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    #[must_use]
    pub fn new(user: User, service: Arc<dyn ProgressService>, sink: UpdateSink) -> Self {
        Self {
            user,
            service,
            sink,
        }
    }

    /// Stores `status` for `item` and returns `item` with the stored status.
    /// Only the completion status is announced to the session; the rest of
    /// `item` may be older than what the lists hold.
    ///
    /// # Errors
    ///
    /// Returns the backend error. Nothing is updated locally in that case.
    pub async fn set_completion(
        &self,
        item: &ContentSummary,
        status: CompletionStatus,
    ) -> Result<ContentSummary> {
        let stored = self.service.set_progress(&self.user, item.id, status).await?;
        let mut updated = item.clone();
        updated.completion = stored;
        log::info!("Progress for {} set to {stored:?}", item.id);
        self.sink
            .content_changed(item.id, ContentChange::Completion(stored));
        Ok(updated)
    }

    /// Records a watched percentage. 100 or more counts as completed.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn update_progress(&self, item: &ContentSummary, percent: u8) -> Result<ContentSummary> {
        let status = if percent >= 100 {
            CompletionStatus::Completed
        } else {
            CompletionStatus::in_progress(percent)
        };
        self.set_completion(item, status).await
    }

    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn mark_completed(&self, item: &ContentSummary) -> Result<ContentSummary> {
        self.set_completion(item, CompletionStatus::Completed).await
    }

    /// Forgets all progress on `item`.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn remove_progress(&self, item: &ContentSummary) -> Result<ContentSummary> {
        self.service.remove_progress(&self.user, item.id).await?;
        let mut updated = item.clone();
        updated.completion = CompletionStatus::NotStarted;
        log::info!("Progress for {} removed", item.id);
        self.sink.content_changed(
            item.id,
            ContentChange::Completion(CompletionStatus::NotStarted),
        );
        Ok(updated)
    }
}
