//! Service traits for the remote content backend.
//!
//! Every component talks to the backend through these traits, so the REST
//! adapter and the in-memory fakes are interchangeable.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::config::VideoQuality;
use crate::error::Result;
use crate::model::{Category, CompletionStatus, ContentId, ContentPage, Domain};
use crate::session::User;

/// Source of one kind of reference list.
#[async_trait]
pub trait ReferenceSource<T>: Send + Sync {
    /// Fetches the full list for `user`.
    async fn fetch(&self, user: &User) -> Result<Vec<T>>;
}

/// Which server-side listing a content query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentScope {
    Library,
    InProgress,
    Completed,
    Bookmarked,
}

/// A paged content listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentQuery {
    pub scope: ContentScope,
    /// 1-based page number.
    pub page: usize,
    pub per_page: usize,
    /// Extra filter parameters, see [`FilterSet::query_params`](crate::FilterSet::query_params).
    pub params: Vec<(String, String)>,
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn contents(&self, user: &User, query: &ContentQuery) -> Result<ContentPage>;
}

#[async_trait]
pub trait ProgressService: Send + Sync {
    /// Records `status` for `id` and returns the status the backend stored.
    async fn set_progress(
        &self,
        user: &User,
        id: ContentId,
        status: CompletionStatus,
    ) -> Result<CompletionStatus>;

    /// Forgets all progress for `id`.
    async fn remove_progress(&self, user: &User, id: ContentId) -> Result<()>;
}

#[async_trait]
pub trait BookmarkService: Send + Sync {
    async fn add_bookmark(&self, user: &User, id: ContentId) -> Result<()>;
    async fn remove_bookmark(&self, user: &User, id: ContentId) -> Result<()>;
}

/// An open video body.
pub struct VideoStream {
    /// Total size when the backend announces it.
    pub size: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl fmt::Debug for VideoStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoStream")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn open_video(&self, user: &User, id: ContentId, quality: VideoQuality)
    -> Result<VideoStream>;
}

/// The full set of backend services a session needs.
#[derive(Clone)]
pub struct Backend {
    pub domains: Arc<dyn ReferenceSource<Domain>>,
    pub categories: Arc<dyn ReferenceSource<Category>>,
    pub contents: Arc<dyn ContentSource>,
    pub progress: Arc<dyn ProgressService>,
    pub bookmarks: Arc<dyn BookmarkService>,
    pub videos: Arc<dyn VideoSource>,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Backend(..)")
    }
}

impl Backend {
    /// Uses one object for every service.
    pub fn from_shared<S>(service: Arc<S>) -> Self
    where
        S: ReferenceSource<Domain>
            + ReferenceSource<Category>
            + ContentSource
            + ProgressService
            + BookmarkService
            + VideoSource
            + 'static,
    {
        Self {
            domains: service.clone(),
            categories: service.clone(),
            contents: service.clone(),
            progress: service.clone(),
            bookmarks: service.clone(),
            videos: service,
        }
    }
}
