//! In-memory backend and fixtures for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use futures::StreamExt;
use tokio::sync::oneshot;

use crate::backend::{
    Backend, BookmarkService, ContentQuery, ContentScope, ContentSource, ProgressService,
    ReferenceSource, VideoSource, VideoStream,
};
use crate::config::{AppConfig, VideoQuality};
use crate::error::{Error, Result};
use crate::model::{
    Category, CompletionStatus, ContentId, ContentKind, ContentPage, ContentSummary, Difficulty,
    Domain,
};
use crate::persist::MemoryStore;
use crate::session::{SessionContext, SessionProvider, User};

pub fn domain(id: u64, name: &str) -> Domain {
    Domain {
        id,
        name: name.to_string(),
        slug: name.to_lowercase(),
    }
}

pub fn category(id: u64, name: &str) -> Category {
    Category {
        id,
        name: name.to_string(),
        ordinal: 0,
    }
}

pub fn summary(id: u64, name: &str) -> ContentSummary {
    ContentSummary {
        id: ContentId(id),
        name: name.to_string(),
        description: String::new(),
        kind: ContentKind::Collection,
        difficulty: Some(Difficulty::Beginner),
        duration: 600,
        released_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        domain_ids: Vec::new(),
        category_ids: Vec::new(),
        completion: CompletionStatus::NotStarted,
        bookmarked: false,
        download: crate::model::DownloadStatus::NotDownloaded,
    }
}

pub fn user(id: u64) -> User {
    User {
        id,
        username: format!("user{id}"),
        token: format!("token-{id}"),
    }
}

/// Context for user 1 over `backend` and `store`.
pub fn context(backend: &Arc<FakeBackend>, store: Arc<MemoryStore>) -> SessionContext {
    SessionContext {
        user: user(1),
        backend: Backend::from_shared(Arc::clone(backend)),
        persistence: store,
        config: Arc::new(AppConfig::default()),
    }
}

/// Writes the fake backend accepted, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeWrite {
    SetProgress(ContentId, CompletionStatus),
    RemoveProgress(ContentId),
    AddBookmark(ContentId),
    RemoveBookmark(ContentId),
}

#[derive(Default)]
struct State {
    domains: Vec<Domain>,
    categories: Vec<Category>,
    contents: HashMap<ContentScope, Vec<ContentSummary>>,
    domain_gates: VecDeque<oneshot::Receiver<Result<Vec<Domain>>>>,
    gated_domain_calls: usize,
    fail_reference: bool,
    fail_writes: bool,
    queries: Vec<ContentQuery>,
    writes: Vec<FakeWrite>,
    video: Vec<u8>,
    fail_video: bool,
    video_opens: usize,
}

fn unavailable() -> Error {
    Error::Api {
        status: 503,
        message: "service unavailable".to_string(),
    }
}

/// Backend double implementing every service trait.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<State>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_domains(&self, domains: Vec<Domain>) {
        self.lock().domains = domains;
    }

    pub fn set_categories(&self, categories: Vec<Category>) {
        self.lock().categories = categories;
    }

    pub fn set_contents(&self, scope: ContentScope, items: Vec<ContentSummary>) {
        self.lock().contents.insert(scope, items);
    }

    /// Makes the next domain fetch wait for a value sent through the
    /// returned sender. Gates are consumed in fetch order.
    pub fn gate_domains(&self) -> oneshot::Sender<Result<Vec<Domain>>> {
        let (tx, rx) = oneshot::channel();
        self.lock().domain_gates.push_back(rx);
        tx
    }

    /// Waits until `n` gated domain fetches have started.
    pub async fn wait_for_gated_domain_calls(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.lock().gated_domain_calls < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    pub fn fail_reference_fetches(&self, fail: bool) {
        self.lock().fail_reference = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn set_video(&self, bytes: Vec<u8>) {
        self.lock().video = bytes;
    }

    /// Makes video streams break after the first chunk.
    pub fn fail_video(&self, fail: bool) {
        self.lock().fail_video = fail;
    }

    pub fn video_opens(&self) -> usize {
        self.lock().video_opens
    }

    pub fn queries(&self, scope: ContentScope) -> Vec<ContentQuery> {
        self.lock()
            .queries
            .iter()
            .filter(|q| q.scope == scope)
            .cloned()
            .collect()
    }

    pub fn writes(&self) -> Vec<FakeWrite> {
        self.lock().writes.clone()
    }

    fn record_write(&self, write: FakeWrite) -> Result<()> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(unavailable());
        }
        state.writes.push(write);
        Ok(())
    }
}

#[async_trait]
impl ReferenceSource<Domain> for FakeBackend {
    async fn fetch(&self, _user: &User) -> Result<Vec<Domain>> {
        let gate = {
            let mut state = self.lock();
            if state.fail_reference {
                return Err(unavailable());
            }
            match state.domain_gates.pop_front() {
                Some(gate) => {
                    state.gated_domain_calls += 1;
                    gate
                }
                None => return Ok(state.domains.clone()),
            }
        };
        gate.await.unwrap_or(Err(Error::Cancelled))
    }
}

#[async_trait]
impl ReferenceSource<Category> for FakeBackend {
    async fn fetch(&self, _user: &User) -> Result<Vec<Category>> {
        let state = self.lock();
        if state.fail_reference {
            return Err(unavailable());
        }
        Ok(state.categories.clone())
    }
}

#[async_trait]
impl ContentSource for FakeBackend {
    async fn contents(&self, _user: &User, query: &ContentQuery) -> Result<ContentPage> {
        let mut state = self.lock();
        state.queries.push(query.clone());
        let all = state.contents.get(&query.scope).cloned().unwrap_or_default();
        let start = query.page.saturating_sub(1) * query.per_page;
        Ok(ContentPage {
            total: all.len(),
            items: all.into_iter().skip(start).take(query.per_page).collect(),
        })
    }
}

#[async_trait]
impl ProgressService for FakeBackend {
    async fn set_progress(
        &self,
        _user: &User,
        id: ContentId,
        status: CompletionStatus,
    ) -> Result<CompletionStatus> {
        self.record_write(FakeWrite::SetProgress(id, status))?;
        Ok(status)
    }

    async fn remove_progress(&self, _user: &User, id: ContentId) -> Result<()> {
        self.record_write(FakeWrite::RemoveProgress(id))
    }
}

#[async_trait]
impl BookmarkService for FakeBackend {
    async fn add_bookmark(&self, _user: &User, id: ContentId) -> Result<()> {
        self.record_write(FakeWrite::AddBookmark(id))
    }

    async fn remove_bookmark(&self, _user: &User, id: ContentId) -> Result<()> {
        self.record_write(FakeWrite::RemoveBookmark(id))
    }
}

#[async_trait]
impl VideoSource for FakeBackend {
    async fn open_video(
        &self,
        _user: &User,
        _id: ContentId,
        _quality: VideoQuality,
    ) -> Result<VideoStream> {
        let mut state = self.lock();
        state.video_opens += 1;
        let mut chunks: Vec<Result<Bytes>> = state
            .video
            .chunks(256)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if state.fail_video {
            chunks.truncate(1);
            chunks.push(Err(Error::Download("connection reset".to_string())));
        }
        Ok(VideoStream {
            size: Some(state.video.len() as u64),
            body: futures::stream::iter(chunks).boxed(),
        })
    }
}

/// Session provider whose user is set directly by the test.
#[derive(Default)]
pub struct StaticProvider {
    user: Mutex<Option<User>>,
}

impl StaticProvider {
    pub fn sign_in(&self, user: User) {
        *self.user.lock().unwrap() = Some(user);
    }
}

impl SessionProvider for StaticProvider {
    fn current_user(&self) -> Option<User> {
        self.user.lock().unwrap().clone()
    }

    fn sign_out(&self) -> Result<()> {
        *self.user.lock().unwrap() = None;
        Ok(())
    }
}
