//! Signed-in user, per-session context, and the session slot.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::Backend;
use crate::bookmarks::BookmarkTracker;
use crate::config::AppConfig;
use crate::coordinator::{
    self, Command, Coordinator, EventSender, SessionEvent, SessionViews, Spawner, UpdateSink,
};
use crate::download::DownloadManager;
use crate::error::{Error, Result};
use crate::persist::PersistenceStore;
use crate::progress::ProgressTracker;

/// An authenticated user.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub username: String,
    /// Bearer token for the backend.
    pub token: String,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Answers "who is signed in, if anyone".
pub trait SessionProvider: Send + Sync {
    fn current_user(&self) -> Option<User>;

    /// Forgets the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns an error if stored credentials cannot be removed.
    fn sign_out(&self) -> Result<()>;
}

/// Everything a session's components are built from.
#[derive(Clone)]
pub struct SessionContext {
    pub user: User,
    pub backend: Backend,
    /// Key/value store scoped to this user.
    pub persistence: Arc<dyn PersistenceStore>,
    pub config: Arc<AppConfig>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// A running coordinator plus the mutation services bound to it.
///
/// Dropping the handle cancels the session task and every fetch it spawned.
pub struct SessionHandle {
    id: Uuid,
    user: User,
    events: EventSender,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    views: SessionViews,
    progress: ProgressTracker,
    bookmarks: BookmarkTracker,
    downloads: Arc<DownloadManager>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Builds the coordinator for `ctx` and starts its task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(ctx: SessionContext) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let sink = UpdateSink::new(events.clone());
        let coordinator =
            Coordinator::new(ctx.clone(), Spawner::new(events.clone(), cancel.clone()));

        let progress = ProgressTracker::new(
            ctx.user.clone(),
            Arc::clone(&ctx.backend.progress),
            sink.clone(),
        );
        let bookmarks = BookmarkTracker::new(
            ctx.user.clone(),
            Arc::clone(&ctx.backend.bookmarks),
            sink.clone(),
        );
        let downloads = Arc::new(DownloadManager::new(
            ctx.user.clone(),
            Arc::clone(&ctx.backend.videos),
            Arc::clone(coordinator.ledger()),
            ctx.config
                .paths
                .download_dir
                .join(ctx.user.id.to_string()),
            ctx.config.downloads.clone(),
            sink,
        ));

        let id = Uuid::new_v4();
        let user = ctx.user;
        let views = coordinator.views();
        let task = tokio::spawn(coordinator::run(coordinator, rx, cancel.clone()));
        log::info!("Session {id} started for {}", user.username);

        Self {
            id,
            user,
            events,
            cancel,
            task: Some(task),
            views,
            progress,
            bookmarks,
            downloads,
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn user(&self) -> &User {
        &self.user
    }

    /// Read-only snapshots of everything the coordinator owns.
    #[must_use]
    pub const fn views(&self) -> &SessionViews {
        &self.views
    }

    #[must_use]
    pub const fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    #[must_use]
    pub const fn bookmarks(&self) -> &BookmarkTracker {
        &self.bookmarks
    }

    #[must_use]
    pub const fn downloads(&self) -> &Arc<DownloadManager> {
        &self.downloads
    }

    /// Queues a command for the coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session task has stopped.
    pub fn send(&self, command: Command) -> Result<()> {
        self.events
            .send(SessionEvent::Command(command))
            .map_err(|_| Error::SessionClosed)
    }

    /// Cancels the session task and waits for it to stop.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            log::error!("Session task for {} failed: {e}", self.user.username);
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        log::info!("Session {} closed", self.id);
    }
}

type BackendFactory = Box<dyn Fn(&User) -> Result<Backend> + Send + Sync>;
type StoreFactory = Box<dyn Fn(&User) -> Result<Arc<dyn PersistenceStore>> + Send + Sync>;

/// The session slot. Holds at most one live [`SessionHandle`], always for
/// the user the provider reports.
pub struct Sessions {
    provider: Arc<dyn SessionProvider>,
    backend: BackendFactory,
    store: StoreFactory,
    config: Arc<AppConfig>,
    active: Option<SessionHandle>,
}

impl fmt::Debug for Sessions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sessions")
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Sessions {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        config: Arc<AppConfig>,
        backend: impl Fn(&User) -> Result<Backend> + Send + Sync + 'static,
        store: impl Fn(&User) -> Result<Arc<dyn PersistenceStore>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            provider,
            backend: Box::new(backend),
            store: Box::new(store),
            config,
            active: None,
        }
    }

    /// Returns the session for the signed-in user, starting one if needed.
    ///
    /// A session for a different user is torn down first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSession`] when nobody is signed in, or the error
    /// from building the user's backend or store.
    pub fn current(&mut self) -> Result<&SessionHandle> {
        let Some(user) = self.provider.current_user() else {
            self.close_active();
            return Err(Error::NoSession);
        };

        let handle = match self.active.take() {
            Some(handle) if handle.user == user => handle,
            stale => {
                if let Some(stale) = stale {
                    log::info!("User changed, closing session {}", stale.id);
                }
                self.start(user)?
            }
        };
        Ok(&*self.active.insert(handle))
    }

    /// The live session, if any, without consulting the provider.
    #[must_use]
    pub const fn active(&self) -> Option<&SessionHandle> {
        self.active.as_ref()
    }

    /// Signs out and discards the live session.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot forget the user. The session
    /// is discarded either way.
    pub fn sign_out(&mut self) -> Result<()> {
        self.close_active();
        self.provider.sign_out()
    }

    fn start(&self, user: User) -> Result<SessionHandle> {
        let ctx = SessionContext {
            backend: (self.backend)(&user)?,
            persistence: (self.store)(&user)?,
            config: Arc::clone(&self.config),
            user,
        };
        Ok(SessionHandle::start(ctx))
    }

    fn close_active(&mut self) {
        self.active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::backend::ContentScope;
    use crate::list::ListKind;
    use crate::model::{CompletionStatus, ContentId, LoadState};
    use crate::persist::MemoryStore;
    use crate::testing::{FakeBackend, StaticProvider, summary, user};

    struct Slot {
        sessions: Sessions,
        provider: Arc<StaticProvider>,
        built: Arc<AtomicUsize>,
    }

    /// Each user's backend lists a single item whose id is the user id.
    fn slot() -> Slot {
        let provider = Arc::new(StaticProvider::default());
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let sessions = Sessions::new(
            provider.clone(),
            Arc::new(AppConfig::default()),
            move |user| {
                counter.fetch_add(1, Ordering::SeqCst);
                let backend = FakeBackend::new();
                backend.set_contents(
                    ContentScope::Library,
                    vec![summary(user.id, &user.username)],
                );
                Ok(Backend::from_shared(Arc::new(backend)))
            },
            |_| Ok(Arc::new(MemoryStore::new())),
        );
        Slot {
            sessions,
            provider,
            built,
        }
    }

    async fn loaded_library(handle: &SessionHandle) -> Vec<u64> {
        let mut rx = handle.views().list(ListKind::Library);
        let list = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|l| l.state == LoadState::Loaded),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        list.items().iter().map(|i| i.id.0).collect()
    }

    #[tokio::test]
    async fn no_user_means_no_session() {
        let mut slot = slot();
        assert!(matches!(slot.sessions.current(), Err(Error::NoSession)));
        assert!(slot.sessions.active().is_none());
        assert_eq!(slot.built.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn same_user_reuses_session() {
        let mut slot = slot();
        slot.provider.sign_in(user(1));

        let first = slot.sessions.current().unwrap().id();
        let second = slot.sessions.current().unwrap().id();
        assert_eq!(first, second);
        assert_eq!(slot.built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn user_switch_replaces_session() {
        let mut slot = slot();
        slot.provider.sign_in(user(1));
        let first = slot.sessions.current().unwrap();
        let first_id = first.id();
        assert_eq!(loaded_library(first).await, [1]);
        let first_views = first.views().clone();

        slot.sessions.sign_out().unwrap();
        assert!(slot.sessions.active().is_none());
        assert!(matches!(slot.sessions.current(), Err(Error::NoSession)));

        slot.provider.sign_in(user(2));
        let second = slot.sessions.current().unwrap();
        assert_ne!(second.id(), first_id);
        assert_eq!(loaded_library(second).await, [2]);
        assert_eq!(second.user().id, 2);

        // The old session's task is gone, so its views stop updating.
        let mut stale = first_views.library;
        stale.borrow_and_update();
        assert!(
            tokio::time::timeout(Duration::from_secs(1), stale.changed())
                .await
                .unwrap()
                .is_err()
        );
    }

    #[tokio::test]
    async fn provider_change_without_sign_out_is_detected() {
        let mut slot = slot();
        slot.provider.sign_in(user(1));
        let first = slot.sessions.current().unwrap().id();

        slot.provider.sign_in(user(3));
        let second = slot.sessions.current().unwrap();
        assert_ne!(second.id(), first);
        assert_eq!(second.user().id, 3);
        assert_eq!(slot.built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn tracker_writes_show_up_in_views() {
        let mut slot = slot();
        slot.provider.sign_in(user(4));
        let session = slot.sessions.current().unwrap();
        assert_eq!(loaded_library(session).await, [4]);

        let held = session
            .views()
            .list_snapshot(ListKind::Library)
            .get(ContentId(4))
            .cloned()
            .unwrap();
        session.bookmarks().add(&held).await.unwrap();
        session.progress().mark_completed(&held).await.unwrap();

        let mut rx = session.views().list(ListKind::Library);
        let library = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|l| {
                l.get(ContentId(4))
                    .is_some_and(|i| i.bookmarked && i.completion.is_completed())
            }),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(
            library.get(ContentId(4)).map(|i| i.completion),
            Some(CompletionStatus::Completed)
        );
    }

    #[tokio::test]
    async fn commands_after_shutdown_fail() {
        let mut slot = slot();
        slot.provider.sign_in(user(1));
        slot.sessions.current().unwrap();
        let handle = slot.sessions.active.take().unwrap();
        let events = handle.events.clone();
        handle.shutdown().await;
        assert!(events.send(SessionEvent::Command(Command::ClearFilters)).is_err());
    }

    #[test]
    fn user_debug_hides_token() {
        let rendered = format!("{:?}", user(5));
        assert!(!rendered.contains(&user(5).token));
        assert!(rendered.contains("redacted"));
    }
}
