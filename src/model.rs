//! Content and reference-data types shared by every component.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a content item. Identity of a [`ContentSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub u64);

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Collection,
    Screencast,
    Episode,
}

impl ContentKind {
    /// Value used for this kind in query parameters and filter keys.
    #[must_use]
    pub const fn as_param(self) -> &'static str {
        match self {
            Self::Collection => "collection",
            Self::Screencast => "screencast",
            Self::Episode => "episode",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Collection => "Video Course",
            Self::Screencast => "Screencast",
            Self::Episode => "Episode",
        }
    }
}

/// Difficulty level of a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub const ALL: [Self; 3] = [Self::Beginner, Self::Intermediate, Self::Advanced];

    #[must_use]
    pub const fn as_param(self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Beginner => "Beginner",
            Self::Intermediate => "Intermediate",
            Self::Advanced => "Advanced",
        }
    }
}

/// How far the signed-in user got through a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CompletionStatus {
    #[default]
    NotStarted,
    InProgress {
        /// Percentage watched, 0..=100.
        percent: u8,
    },
    Completed,
}

impl CompletionStatus {
    /// Builds an in-progress status, clamping the percentage to 100.
    #[must_use]
    pub fn in_progress(percent: u8) -> Self {
        Self::InProgress {
            percent: percent.min(100),
        }
    }

    #[must_use]
    pub const fn is_in_progress(self) -> bool {
        matches!(self, Self::InProgress { .. })
    }

    #[must_use]
    pub const fn is_completed(self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Whether a content item's video is available offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    #[default]
    NotDownloaded,
    Downloaded,
}

/// A content item as listed in any of the content lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSummary {
    pub id: ContentId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: ContentKind,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    /// Running time in seconds.
    #[serde(default)]
    pub duration: u32,
    pub released_at: DateTime<Utc>,
    /// Platforms (domains) this item belongs to.
    #[serde(default)]
    pub domain_ids: Vec<u64>,
    #[serde(default)]
    pub category_ids: Vec<u64>,
    #[serde(default)]
    pub completion: CompletionStatus,
    #[serde(default)]
    pub bookmarked: bool,
    #[serde(default)]
    pub download: DownloadStatus,
}

/// One confirmed write to a single field of a content item.
///
/// Mutation services announce these rather than whole items, so two writes
/// made from the same stale copy cannot undo each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentChange {
    Completion(CompletionStatus),
    Bookmarked(bool),
    Download(DownloadStatus),
}

impl ContentChange {
    /// Writes the change into `item`. Returns `false` if `item` already had
    /// that value.
    pub fn apply(self, item: &mut ContentSummary) -> bool {
        match self {
            Self::Completion(status) => set_if_changed(&mut item.completion, status),
            Self::Bookmarked(on) => set_if_changed(&mut item.bookmarked, on),
            Self::Download(status) => set_if_changed(&mut item.download, status),
        }
    }
}

fn set_if_changed<T: PartialEq>(field: &mut T, value: T) -> bool {
    if *field == value {
        return false;
    }
    *field = value;
    true
}

/// A platform the catalog is partitioned by (iOS, Android, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: u64,
    pub name: String,
    pub slug: String,
}

/// A topic category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub ordinal: u32,
}

/// Fetch status of a list, as shown to observers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    /// Nothing requested yet.
    #[default]
    Initial,
    Loading,
    Loaded,
    /// The last fetch failed. Previously held data is kept.
    Failed(String),
}

impl LoadState {
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }
}

/// One page of a content listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPage {
    pub items: Vec<ContentSummary>,
    /// Total number of items matching the query across all pages.
    pub total: usize,
}
