//! Reference data loaders for domains and categories.
//!
//! A loader holds the last successfully fetched list and publishes it as a
//! [`ReferenceSnapshot`]. Fetches may overlap; each completion is applied on
//! the session task in the order it arrives, so the held list is always the
//! result of the most recently *completed* fetch.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::backend::ReferenceSource;
use crate::coordinator::{SessionEvent, Spawner};
use crate::error::Result;
use crate::model::{Category, Domain, LoadState};
use crate::observe::{Published, Revisioned};
use crate::persist::{PersistenceStore, load_json, save_json};
use crate::session::User;

/// A type that can be loaded as reference data.
pub trait ReferenceEntry: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Used in logs and as the cache key.
    const LABEL: &'static str;

    /// Wraps a finished fetch into the event the session task applies.
    fn loaded(ticket: FetchTicket, result: Result<Vec<Self>>) -> SessionEvent;
}

impl ReferenceEntry for Domain {
    const LABEL: &'static str = "domains";

    fn loaded(ticket: FetchTicket, result: Result<Vec<Self>>) -> SessionEvent {
        SessionEvent::DomainsLoaded { ticket, result }
    }
}

impl ReferenceEntry for Category {
    const LABEL: &'static str = "categories";

    fn loaded(ticket: FetchTicket, result: Result<Vec<Self>>) -> SessionEvent {
        SessionEvent::CategoriesLoaded { ticket, result }
    }
}

/// Identifies one `populate` call. Tickets increase in start order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FetchTicket(u64);

/// What observers of a loader see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSnapshot<T> {
    pub entries: Vec<T>,
    pub state: LoadState,
    /// Bumped once per list replacement; failures leave it alone.
    pub revision: u64,
    /// Fetches started but not yet completed.
    pub in_flight: usize,
}

impl<T> Default for ReferenceSnapshot<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            state: LoadState::Initial,
            revision: 0,
            in_flight: 0,
        }
    }
}

impl<T> Revisioned for ReferenceSnapshot<T> {
    fn revision(&self) -> u64 {
        self.revision
    }
}

pub struct ReferenceLoader<T> {
    source: Arc<dyn ReferenceSource<T>>,
    snapshot: Published<ReferenceSnapshot<T>>,
    issued: u64,
    last_completed: Option<FetchTicket>,
}

impl<T: ReferenceEntry> ReferenceLoader<T> {
    #[must_use]
    pub fn new(source: Arc<dyn ReferenceSource<T>>) -> Self {
        Self {
            source,
            snapshot: Published::new(ReferenceSnapshot::default()),
            issued: 0,
            last_completed: None,
        }
    }

    fn cache_key() -> String {
        format!("reference.{}", T::LABEL)
    }

    /// Loads the list saved by the last successful fetch, if any. Counts as a
    /// replacement.
    pub fn seed_from_cache(&mut self, store: &dyn PersistenceStore) -> bool {
        match load_json::<Vec<T>>(store, &Self::cache_key()) {
            Ok(Some(entries)) => {
                log::debug!("Seeded {} {} from cache", entries.len(), T::LABEL);
                self.snapshot.modify(|s| {
                    s.entries = entries;
                    s.revision += 1;
                    s.state = LoadState::Loaded;
                    true
                });
                true
            }
            Ok(None) => false,
            Err(e) => {
                log::warn!("Ignoring cached {}: {e}", T::LABEL);
                false
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<ReferenceSnapshot<T>> {
        self.snapshot.snapshot()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ReferenceSnapshot<T>>> {
        self.snapshot.subscribe()
    }

    /// Registers a new fetch and marks the loader as loading.
    pub fn begin(&mut self) -> FetchTicket {
        self.issued += 1;
        self.snapshot.modify(|s| {
            s.in_flight += 1;
            s.state = LoadState::Loading;
            true
        });
        FetchTicket(self.issued)
    }

    /// Starts a fetch for `user`. The result comes back through the session
    /// event channel and is applied with [`complete`](Self::complete).
    pub fn populate(&mut self, user: &User, spawner: &Spawner) -> FetchTicket {
        let ticket = self.begin();
        let source = Arc::clone(&self.source);
        let user = user.clone();
        spawner.spawn(
            async move { source.fetch(&user).await },
            move |result| T::loaded(ticket, result),
        );
        ticket
    }

    /// Applies a finished fetch. Returns `true` if the list was replaced.
    ///
    /// On failure the previous list stays in place and the error is exposed
    /// through [`LoadState::Failed`].
    pub fn complete(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<T>>,
        cache: Option<&dyn PersistenceStore>,
    ) -> bool {
        if let Some(previous) = self.last_completed
            && ticket < previous
        {
            log::debug!(
                "{} fetch #{} completed after #{}",
                T::LABEL,
                ticket.0,
                previous.0
            );
        }
        self.last_completed = Some(ticket);

        match result {
            Ok(entries) => {
                if let Some(store) = cache
                    && let Err(e) = save_json(store, &Self::cache_key(), &entries)
                {
                    log::warn!("Failed to cache {}: {e}", T::LABEL);
                }
                self.snapshot.modify(|s| {
                    s.in_flight = s.in_flight.saturating_sub(1);
                    s.entries = entries;
                    s.revision += 1;
                    s.state = if s.in_flight > 0 {
                        LoadState::Loading
                    } else {
                        LoadState::Loaded
                    };
                    true
                });
                true
            }
            Err(e) => {
                log::warn!("Failed to load {}: {e}", T::LABEL);
                self.snapshot.modify(|s| {
                    s.in_flight = s.in_flight.saturating_sub(1);
                    s.state = LoadState::Failed(e.to_string());
                    true
                });
                false
            }
        }
    }
}
