//! Content list view-models.
//!
//! Each list holds an ordered, identifier-unique collection of
//! [`ContentSummary`] values for one scope (library, in progress, completed,
//! bookmarked, downloaded) and publishes it as a [`ContentList`] snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::backend::{ContentQuery, ContentScope, ContentSource};
use crate::coordinator::{SessionEvent, Spawner};
use crate::error::Result;
use crate::model::{
    ContentChange, ContentId, ContentPage, ContentSummary, DownloadStatus, LoadState,
};
use crate::observe::Published;
use crate::session::User;

/// The lists a session owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Library,
    InProgress,
    Completed,
    Bookmarks,
    Downloads,
}

impl ListKind {
    pub const ALL: [Self; 5] = [
        Self::Library,
        Self::InProgress,
        Self::Completed,
        Self::Bookmarks,
        Self::Downloads,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Library => "Library",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::Bookmarks => "Bookmarks",
            Self::Downloads => "Downloads",
        }
    }

    /// Server-side listing backing this list. `None` for lists kept locally.
    #[must_use]
    pub const fn remote_scope(self) -> Option<ContentScope> {
        match self {
            Self::Library => Some(ContentScope::Library),
            Self::InProgress => Some(ContentScope::InProgress),
            Self::Completed => Some(ContentScope::Completed),
            Self::Bookmarks => Some(ContentScope::Bookmarked),
            Self::Downloads => None,
        }
    }

    /// Scope predicate: whether `item` belongs in this list.
    #[must_use]
    pub fn admits(self, item: &ContentSummary) -> bool {
        match self {
            Self::Library => true,
            Self::InProgress => item.completion.is_in_progress(),
            Self::Completed => item.completion.is_completed(),
            Self::Bookmarks => item.bookmarked,
            Self::Downloads => item.download == DownloadStatus::Downloaded,
        }
    }
}

/// Ordered collection of content summaries keyed by identifier.
///
/// Never holds two entries with the same identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentList {
    items: Vec<ContentSummary>,
    positions: HashMap<ContentId, usize>,
    pub state: LoadState,
    /// Total matching items on the server (or locally for downloads).
    pub total: usize,
    /// Pages loaded so far.
    pub pages: usize,
}

impl ContentList {
    #[must_use]
    pub fn items(&self) -> &[ContentSummary] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: ContentId) -> bool {
        self.positions.contains_key(&id)
    }

    #[must_use]
    pub fn get(&self, id: ContentId) -> Option<&ContentSummary> {
        self.positions.get(&id).map(|&i| &self.items[i])
    }

    /// Whether the server reported more items than are loaded.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.items.len() < self.total
    }

    /// Replaces the entry with `item`'s identifier, keeping its position.
    /// Returns `false` (and changes nothing) if no such entry exists.
    pub fn update_entry_if_it_exists(&mut self, item: &ContentSummary) -> bool {
        match self.positions.get(&item.id) {
            Some(&i) if self.items[i] != *item => {
                self.items[i] = item.clone();
                true
            }
            _ => false,
        }
    }

    /// Applies `change` to the entry for `id`, leaving its other fields as
    /// they are. Returns `false` if there is no such entry or it already had
    /// that value.
    pub fn apply_change(&mut self, id: ContentId, change: ContentChange) -> bool {
        match self.positions.get(&id) {
            Some(&i) => change.apply(&mut self.items[i]),
            None => false,
        }
    }

    /// Replaces the contents, dropping repeated identifiers.
    pub fn replace_all(&mut self, items: Vec<ContentSummary>) {
        self.items.clear();
        self.positions.clear();
        self.extend(items);
    }

    /// Appends items not already present. Returns how many were added.
    pub fn extend(&mut self, items: impl IntoIterator<Item = ContentSummary>) -> usize {
        let before = self.items.len();
        for item in items {
            if !self.positions.contains_key(&item.id) {
                self.positions.insert(item.id, self.items.len());
                self.items.push(item);
            }
        }
        self.items.len() - before
    }

    /// Inserts at the front if absent.
    pub fn insert_front(&mut self, item: ContentSummary) -> bool {
        if self.contains(item.id) {
            return false;
        }
        self.items.insert(0, item);
        self.reindex();
        true
    }

    pub fn remove(&mut self, id: ContentId) -> Option<ContentSummary> {
        let index = self.positions.remove(&id)?;
        let removed = self.items.remove(index);
        self.reindex();
        Some(removed)
    }

    fn reindex(&mut self) {
        self.positions = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id, i))
            .collect();
    }
}

/// A page fetch tagged with the query generation it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub generation: u64,
    pub page: usize,
}

/// Owner of one [`ContentList`].
#[derive(Debug)]
pub struct ContentListViewModel {
    kind: ListKind,
    list: Published<ContentList>,
    /// Bumped on every reload; pages from older generations are discarded.
    generation: u64,
    page_in_flight: Option<PageRequest>,
}

impl ContentListViewModel {
    #[must_use]
    pub fn new(kind: ListKind) -> Self {
        Self {
            kind,
            list: Published::new(ContentList::default()),
            generation: 0,
            page_in_flight: None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ListKind {
        self.kind
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<ContentList> {
        self.list.snapshot()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ContentList>> {
        self.list.subscribe()
    }

    #[must_use]
    pub fn contains(&self, id: ContentId) -> bool {
        self.list.with(|l| l.contains(id))
    }

    /// Patches the entry with `item`'s identifier in place. No-op if absent.
    pub fn update_entry_if_it_exists(&mut self, item: &ContentSummary) -> bool {
        self.list.modify(|l| l.update_entry_if_it_exists(item))
    }

    /// Merges a single-field change into the entry for `id`. No-op if absent.
    pub fn apply_change(&mut self, id: ContentId, change: ContentChange) -> bool {
        self.list.modify(|l| l.apply_change(id, change))
    }

    /// Current copy of the entry for `id`.
    #[must_use]
    pub fn get(&self, id: ContentId) -> Option<ContentSummary> {
        self.list.with(|l| l.get(id).cloned())
    }

    /// Adds or drops `item` according to the list's scope predicate.
    ///
    /// Only used for lists whose membership is decided locally.
    pub fn reconcile_membership(&mut self, item: &ContentSummary) -> bool {
        let admitted = self.kind.admits(item);
        self.list.modify(|l| {
            if admitted {
                let inserted = l.insert_front(item.clone());
                if inserted {
                    l.total += 1;
                }
                inserted
            } else if l.remove(item.id).is_some() {
                l.total = l.total.saturating_sub(1);
                true
            } else {
                false
            }
        })
    }

    /// Replaces the whole list with locally known items.
    pub fn replace_local(&mut self, items: Vec<ContentSummary>) {
        self.generation += 1;
        self.page_in_flight = None;
        self.list.modify(|l| {
            l.replace_all(items);
            l.total = l.len();
            l.pages = 1;
            l.state = LoadState::Loaded;
            true
        });
    }

    /// Starts a new query from page 1. Pages from earlier queries still in
    /// flight will be ignored when they land.
    pub fn begin_reload(&mut self) -> PageRequest {
        self.generation += 1;
        let request = PageRequest {
            generation: self.generation,
            page: 1,
        };
        self.page_in_flight = Some(request);
        self.list.modify(|l| {
            l.state = LoadState::Loading;
            true
        });
        request
    }

    /// Requests the next page of the current query, unless one is already in
    /// flight or everything is loaded.
    pub fn begin_next_page(&mut self) -> Option<PageRequest> {
        if self.page_in_flight.is_some() {
            return None;
        }
        let (has_more, pages) = self.list.with(|l| (l.has_more(), l.pages));
        if !has_more || pages == 0 {
            return None;
        }
        let request = PageRequest {
            generation: self.generation,
            page: pages + 1,
        };
        self.page_in_flight = Some(request);
        self.list.modify(|l| {
            l.state = LoadState::Loading;
            true
        });
        Some(request)
    }

    /// Spawns the fetch for `request`.
    pub fn fetch(
        &self,
        request: PageRequest,
        source: Arc<dyn ContentSource>,
        user: User,
        per_page: usize,
        params: Vec<(String, String)>,
        spawner: &Spawner,
    ) {
        let Some(scope) = self.kind.remote_scope() else {
            return;
        };
        let kind = self.kind;
        let query = ContentQuery {
            scope,
            page: request.page,
            per_page,
            params,
        };
        spawner.spawn(
            async move { source.contents(&user, &query).await },
            move |result| SessionEvent::PageLoaded {
                kind,
                request,
                result,
            },
        );
    }

    /// Applies a finished page fetch. Returns `false` if the page belonged
    /// to a superseded query.
    pub fn complete_page(&mut self, request: PageRequest, result: Result<ContentPage>) -> bool {
        if request.generation != self.generation {
            log::debug!(
                "Discarding stale {} page {} (generation {} < {})",
                self.kind.label(),
                request.page,
                request.generation,
                self.generation
            );
            return false;
        }
        if self.page_in_flight == Some(request) {
            self.page_in_flight = None;
        }

        match result {
            Ok(page) => {
                self.list.modify(|l| {
                    if request.page == 1 {
                        l.replace_all(page.items);
                    } else {
                        l.extend(page.items);
                    }
                    l.total = page.total.max(l.len());
                    l.pages = request.page;
                    l.state = LoadState::Loaded;
                    true
                });
                true
            }
            Err(e) => {
                log::warn!("Failed to load {} page {}: {e}", self.kind.label(), request.page);
                self.list.modify(|l| {
                    l.state = LoadState::Failed(e.to_string());
                    true
                });
                true
            }
        }
    }
}
