//! coursedeck - client core for browsing, tracking and downloading video
//! courses.
//!
//! A signed-in user gets one session: a [`Coordinator`] running on its own
//! task that owns the filter store, the domain and category loaders and every
//! content list. Mutation services ([`ProgressTracker`], [`BookmarkTracker`],
//! [`DownloadManager`]) report confirmed writes back to it, and it patches
//! each list that holds a stale copy of the item. UI code reads published
//! snapshots through [`SessionViews`] and [`TabNav`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use coursedeck::{
//!     AppConfig, Backend, FileSessionProvider, FileStore, ListKind, RestClient, Sessions,
//!     TokenCipher,
//! };
//!
//! # async fn example() -> coursedeck::Result<()> {
//! let config = Arc::new(AppConfig::load_or_create(&AppConfig::default_path())?);
//! let provider = Arc::new(FileSessionProvider::new(
//!     config.paths.session_file(),
//!     TokenCipher::machine(),
//! ));
//!
//! let api = config.api.clone();
//! let paths = config.paths.clone();
//! let mut sessions = Sessions::new(
//!     provider,
//!     Arc::clone(&config),
//!     move |_| Ok(Backend::from_shared(Arc::new(RestClient::new(&api)?))),
//!     move |user| Ok(Arc::new(FileStore::new(paths.user_dir(user.id)))),
//! );
//!
//! let session = sessions.current()?;
//! let library = session.views().list_snapshot(ListKind::Library);
//! println!("{} items", library.len());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod backend;
pub mod bookmarks;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod download;
pub mod error;
pub mod filter;
pub mod format;
pub mod fs;
pub mod list;
pub mod model;
pub mod observe;
pub mod persist;
pub mod progress;
pub mod reference;
pub mod rest;
pub mod session;
pub mod shell;
pub mod stats;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use backend::{Backend, ContentQuery, ContentScope};
pub use bookmarks::BookmarkTracker;
pub use config::{AppConfig, DownloadConfig, VideoQuality};
pub use coordinator::{Command, Coordinator, SessionViews, UpdateSink};
pub use credentials::{FileSessionProvider, TokenCipher};
pub use download::{
    DownloadLedger, DownloadManager, DownloadProgress, DownloadRecord, NoProgress, SharedLedger,
};
pub use error::{Error, Result};
pub use filter::{FilterGroupKind, FilterSet, FilterStore, SortOrder};
pub use format::{format_bytes, format_elapsed, format_runtime, format_speed};
pub use fs::{FileSystem, TokioFileSystem};
pub use list::{ContentList, ListKind};
pub use model::{CompletionStatus, ContentChange, ContentId, ContentSummary, LoadState};
pub use persist::{FileStore, MemoryStore, PersistenceStore};
pub use progress::ProgressTracker;
pub use rest::RestClient;
pub use session::{SessionContext, SessionHandle, SessionProvider, Sessions, User};
pub use shell::{MyTutorialsSection, Tab, TabContents, TabNav};
pub use stats::{BatchStats, TransferStats};
