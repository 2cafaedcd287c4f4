//! The session coordinator.
//!
//! A [`Coordinator`] owns the filter store, both reference loaders and every
//! content list for one signed-in user. It runs on a single task: fetches are
//! spawned elsewhere and their results come back as [`SessionEvent`]s, which
//! [`run`] applies one at a time. Observers only ever see published snapshots
//! (see [`SessionViews`]).

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::download::SharedLedger;
use crate::error::Result;
use crate::filter::{
    CompletionFilter, FilterGroupKind, FilterSelection, FilterSet, FilterStore, SELECTION_KEY,
    SortOrder,
};
use crate::list::{ContentList, ContentListViewModel, ListKind, PageRequest};
use crate::model::{
    Category, ContentChange, ContentId, ContentPage, ContentSummary, Domain, DownloadStatus,
};
use crate::observe::Subscription;
use crate::persist::{load_json, save_json};
use crate::reference::{FetchTicket, ReferenceLoader, ReferenceSnapshot};
use crate::session::SessionContext;

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Requests from the UI to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Reload a list from its first page.
    Refresh(ListKind),
    /// Fetch the next page of a list, if there is one.
    LoadMore(ListKind),
    /// Re-fetch domains and categories.
    RefreshReferenceData,
    ToggleFilter { group: FilterGroupKind, key: String },
    SetSearch(Option<String>),
    SetSort(SortOrder),
    SetCompletionFilter(Option<CompletionFilter>),
    SetBookmarkedOnly(bool),
    ClearFilters,
}

/// Everything the session task reacts to.
#[derive(Debug)]
pub enum SessionEvent {
    DomainsLoaded {
        ticket: FetchTicket,
        result: Result<Vec<Domain>>,
    },
    CategoriesLoaded {
        ticket: FetchTicket,
        result: Result<Vec<Category>>,
    },
    PageLoaded {
        kind: ListKind,
        request: PageRequest,
        result: Result<ContentPage>,
    },
    /// A progress or bookmark write was confirmed by the backend.
    ContentChanged { id: ContentId, change: ContentChange },
    /// An item was downloaded or its download deleted.
    DownloadChanged(Box<ContentSummary>),
    Command(Command),
}

/// Spawns background work whose result is delivered back to the session task.
#[derive(Debug, Clone)]
pub struct Spawner {
    events: EventSender,
    cancel: CancellationToken,
}

impl Spawner {
    #[must_use]
    pub const fn new(events: EventSender, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Runs `fut` on its own task and sends `into_event(result)` to the
    /// session. Dropped silently if the session is cancelled first.
    pub fn spawn<F, T, E>(&self, fut: F, into_event: E)
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
        E: FnOnce(Result<T>) -> SessionEvent + Send + 'static,
    {
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                () = cancel.cancelled() => return,
                result = fut => result,
            };
            if events.send(into_event(result)).is_err() {
                log::debug!("Session closed before fetch result was delivered");
            }
        });
    }
}

/// Publisher handed to mutation services so they can announce confirmed
/// writes without holding the coordinator.
#[derive(Debug, Clone)]
pub struct UpdateSink {
    events: EventSender,
}

impl UpdateSink {
    #[must_use]
    pub const fn new(events: EventSender) -> Self {
        Self { events }
    }

    /// Queues a confirmed change to `id` for fan-out into every list.
    pub fn content_changed(&self, id: ContentId, change: ContentChange) {
        self.send(SessionEvent::ContentChanged { id, change });
    }

    /// Queues `item` for fan-out and a Downloads membership check.
    pub fn download_changed(&self, item: &ContentSummary) {
        self.send(SessionEvent::DownloadChanged(Box::new(item.clone())));
    }

    fn send(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Session closed, dropping content update");
        }
    }
}

/// Read-only access to everything the coordinator publishes.
#[derive(Debug, Clone)]
pub struct SessionViews {
    pub filters: watch::Receiver<Arc<FilterSet>>,
    pub domains: watch::Receiver<Arc<ReferenceSnapshot<Domain>>>,
    pub categories: watch::Receiver<Arc<ReferenceSnapshot<Category>>>,
    pub library: watch::Receiver<Arc<ContentList>>,
    pub in_progress: watch::Receiver<Arc<ContentList>>,
    pub completed: watch::Receiver<Arc<ContentList>>,
    pub bookmarks: watch::Receiver<Arc<ContentList>>,
    pub downloads: watch::Receiver<Arc<ContentList>>,
}

impl SessionViews {
    #[must_use]
    pub fn list(&self, kind: ListKind) -> watch::Receiver<Arc<ContentList>> {
        match kind {
            ListKind::Library => self.library.clone(),
            ListKind::InProgress => self.in_progress.clone(),
            ListKind::Completed => self.completed.clone(),
            ListKind::Bookmarks => self.bookmarks.clone(),
            ListKind::Downloads => self.downloads.clone(),
        }
    }

    /// Current snapshot of one list.
    #[must_use]
    pub fn list_snapshot(&self, kind: ListKind) -> Arc<ContentList> {
        Arc::clone(&self.list(kind).borrow())
    }
}

pub struct Coordinator {
    ctx: SessionContext,
    spawner: Spawner,
    ledger: Arc<SharedLedger>,
    filters: FilterStore,
    domains: ReferenceLoader<Domain>,
    categories: ReferenceLoader<Category>,
    library: ContentListViewModel,
    in_progress: ContentListViewModel,
    completed: ContentListViewModel,
    bookmarks: ContentListViewModel,
    downloads: ContentListViewModel,
    domains_sub: Subscription<ReferenceSnapshot<Domain>>,
    categories_sub: Subscription<ReferenceSnapshot<Category>>,
}

impl Coordinator {
    /// Builds every owned component and starts the initial fetches.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(ctx: SessionContext, spawner: Spawner) -> Self {
        let store = ctx.persistence.as_ref();

        let selection = match load_json::<FilterSelection>(store, SELECTION_KEY) {
            Ok(selection) => selection.unwrap_or_default(),
            Err(e) => {
                log::warn!("Ignoring saved filters: {e}");
                FilterSelection::default()
            }
        };

        let mut domains = ReferenceLoader::new(Arc::clone(&ctx.backend.domains));
        domains.seed_from_cache(store);
        let mut categories = ReferenceLoader::new(Arc::clone(&ctx.backend.categories));
        categories.seed_from_cache(store);

        let domains_sub = Subscription::new(domains.subscribe());
        let categories_sub = Subscription::new(categories.subscribe());
        let ledger = Arc::new(SharedLedger::open(Arc::clone(&ctx.persistence)));

        let mut coordinator = Self {
            ledger,
            filters: FilterStore::restored(&selection),
            domains,
            categories,
            library: ContentListViewModel::new(ListKind::Library),
            in_progress: ContentListViewModel::new(ListKind::InProgress),
            completed: ContentListViewModel::new(ListKind::Completed),
            bookmarks: ContentListViewModel::new(ListKind::Bookmarks),
            downloads: ContentListViewModel::new(ListKind::Downloads),
            domains_sub,
            categories_sub,
            ctx,
            spawner,
        };
        coordinator.apply_reference_updates();
        coordinator.load_initial();
        coordinator
    }

    fn load_initial(&mut self) {
        log::info!("Loading content for {}", self.ctx.user.username);
        self.refresh_reference_data();
        for kind in ListKind::ALL {
            self.reload(kind);
        }
    }

    #[must_use]
    pub fn views(&self) -> SessionViews {
        SessionViews {
            filters: self.filters.subscribe(),
            domains: self.domains.subscribe(),
            categories: self.categories.subscribe(),
            library: self.library.subscribe(),
            in_progress: self.in_progress.subscribe(),
            completed: self.completed.subscribe(),
            bookmarks: self.bookmarks.subscribe(),
            downloads: self.downloads.subscribe(),
        }
    }

    /// The download ledger the Downloads list follows. Hand it to the
    /// session's download manager.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<SharedLedger> {
        &self.ledger
    }

    #[must_use]
    pub const fn filters(&self) -> &FilterStore {
        &self.filters
    }

    #[must_use]
    pub const fn domains(&self) -> &ReferenceLoader<Domain> {
        &self.domains
    }

    #[must_use]
    pub const fn categories(&self) -> &ReferenceLoader<Category> {
        &self.categories
    }

    #[must_use]
    pub const fn list(&self, kind: ListKind) -> &ContentListViewModel {
        match kind {
            ListKind::Library => &self.library,
            ListKind::InProgress => &self.in_progress,
            ListKind::Completed => &self.completed,
            ListKind::Bookmarks => &self.bookmarks,
            ListKind::Downloads => &self.downloads,
        }
    }

    const fn list_mut(&mut self, kind: ListKind) -> &mut ContentListViewModel {
        match kind {
            ListKind::Library => &mut self.library,
            ListKind::InProgress => &mut self.in_progress,
            ListKind::Completed => &mut self.completed,
            ListKind::Bookmarks => &mut self.bookmarks,
            ListKind::Downloads => &mut self.downloads,
        }
    }

    /// Patches `item` into every list that holds it. Returns how many lists
    /// changed.
    pub fn disseminate_updates(&mut self, item: &ContentSummary) -> usize {
        ListKind::ALL
            .into_iter()
            .filter(|&kind| self.list_mut(kind).update_entry_if_it_exists(item))
            .count()
    }

    /// Merges `change` into every list's current entry for `id`, leaving the
    /// entry's other fields alone. Returns how many lists changed.
    pub fn disseminate_change(&mut self, id: ContentId, change: ContentChange) -> usize {
        ListKind::ALL
            .into_iter()
            .filter(|&kind| self.list_mut(kind).apply_change(id, change))
            .count()
    }

    /// The most recently confirmed copy of `id` held by any list.
    fn current_entry(&self, id: ContentId) -> Option<ContentSummary> {
        ListKind::ALL
            .into_iter()
            .find_map(|kind| self.list(kind).get(id))
    }

    pub fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::DomainsLoaded { ticket, result } => {
                self.domains
                    .complete(ticket, result, Some(self.ctx.persistence.as_ref()));
                if self.apply_reference_updates() {
                    self.reload(ListKind::Library);
                }
            }
            SessionEvent::CategoriesLoaded { ticket, result } => {
                self.categories
                    .complete(ticket, result, Some(self.ctx.persistence.as_ref()));
                if self.apply_reference_updates() {
                    self.reload(ListKind::Library);
                }
            }
            SessionEvent::PageLoaded {
                kind,
                request,
                result,
            } => {
                let result = result.map(|mut page| {
                    self.overlay_downloads(&mut page.items);
                    page
                });
                self.list_mut(kind).complete_page(request, result);
            }
            SessionEvent::ContentChanged { id, change } => {
                let changed = self.disseminate_change(id, change);
                if let Err(e) = self.ledger.apply_change(id, change) {
                    log::warn!("Failed to update download record of {id}: {e}");
                }
                log::debug!("Content {id} updated in {changed} list(s)");
            }
            SessionEvent::DownloadChanged(item) => self.download_changed(*item),
            SessionEvent::Command(command) => self.apply(command),
        }
    }

    /// An item entering Downloads takes the freshest copy any list holds, and
    /// its ledger record is updated to match.
    fn download_changed(&mut self, item: ContentSummary) {
        let id = item.id;
        let status = item.download;
        let changed = self.disseminate_change(id, ContentChange::Download(status));

        let mut entry = self.current_entry(id).unwrap_or(item);
        entry.download = status;
        if status == DownloadStatus::Downloaded
            && let Err(e) = self.ledger.refresh(&entry)
        {
            log::warn!("Failed to update download record of {id}: {e}");
        }
        let moved = self.downloads.reconcile_membership(&entry);
        log::debug!(
            "Download state of {id} updated in {changed} list(s){}",
            if moved { ", downloads membership changed" } else { "" }
        );
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Refresh(kind) => self.reload(kind),
            Command::LoadMore(kind) => self.load_more(kind),
            Command::RefreshReferenceData => self.refresh_reference_data(),
            Command::ToggleFilter { group, key } => {
                let changed = self.filters.toggle(group, &key);
                self.filters_changed(changed);
            }
            Command::SetSearch(query) => {
                let changed = self.filters.set_search(query);
                self.filters_changed(changed);
            }
            Command::SetSort(sort) => {
                let changed = self.filters.set_sort(sort);
                self.filters_changed(changed);
            }
            Command::SetCompletionFilter(completion) => {
                let changed = self.filters.set_completion(completion);
                self.filters_changed(changed);
            }
            Command::SetBookmarkedOnly(on) => {
                let changed = self.filters.set_bookmarked_only(on);
                self.filters_changed(changed);
            }
            Command::ClearFilters => {
                let changed = self.filters.clear();
                self.filters_changed(changed);
            }
        }
    }

    fn refresh_reference_data(&mut self) {
        self.domains.populate(&self.ctx.user, &self.spawner);
        self.categories.populate(&self.ctx.user, &self.spawner);
    }

    /// Feeds new reference data into the filter store. Returns `true` if the
    /// library query changed as a result.
    fn apply_reference_updates(&mut self) -> bool {
        let before = self.filters.snapshot().query_params();
        if let Some(snapshot) = self.domains_sub.poll() {
            self.filters.update_platform_filters(&snapshot.entries);
        }
        if let Some(snapshot) = self.categories_sub.poll() {
            self.filters.update_category_filters(&snapshot.entries);
        }
        self.filters.snapshot().query_params() != before
    }

    fn filters_changed(&mut self, changed: bool) {
        if !changed {
            return;
        }
        if let Err(e) = save_json(
            self.ctx.persistence.as_ref(),
            SELECTION_KEY,
            &self.filters.selection(),
        ) {
            log::warn!("Failed to save filters: {e}");
        }
        self.reload(ListKind::Library);
    }

    fn query_params(&self, kind: ListKind) -> Vec<(String, String)> {
        if kind == ListKind::Library {
            self.filters.snapshot().query_params()
        } else {
            Vec::new()
        }
    }

    fn reload(&mut self, kind: ListKind) {
        if kind == ListKind::Downloads {
            self.downloads.replace_local(self.ledger.summaries());
            return;
        }
        let request = self.list_mut(kind).begin_reload();
        self.fetch_page(kind, request);
    }

    fn load_more(&mut self, kind: ListKind) {
        if kind.remote_scope().is_none() {
            return;
        }
        if let Some(request) = self.list_mut(kind).begin_next_page() {
            self.fetch_page(kind, request);
        }
    }

    fn fetch_page(&self, kind: ListKind, request: PageRequest) {
        self.list(kind).fetch(
            request,
            Arc::clone(&self.ctx.backend.contents),
            self.ctx.user.clone(),
            self.ctx.config.api.page_size,
            self.query_params(kind),
            &self.spawner,
        );
    }

    /// Download state is only known locally, so remote items take it from the
    /// Downloads list.
    fn overlay_downloads(&self, items: &mut [ContentSummary]) {
        for item in items {
            item.download = if self.downloads.contains(item.id) {
                DownloadStatus::Downloaded
            } else {
                DownloadStatus::NotDownloaded
            };
        }
    }
}

/// Applies session events until `cancel` fires.
pub async fn run(
    mut coordinator: Coordinator,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                coordinator.handle(event);
            }
        }
    }
    log::debug!("Session task for {} stopped", coordinator.ctx.user.username);
}
