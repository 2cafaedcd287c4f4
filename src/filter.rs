//! Filter store: the active predicate set for content listings.
//!
//! Platform and category options are derived from reference data. Every
//! replacement of that data rebuilds the matching group, keeping selections
//! whose entry still exists and dropping the rest, so the options offered to
//! the UI are always a subset of the known reference entries.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::model::{Category, CompletionStatus, ContentKind, ContentSummary, Difficulty, Domain};
use crate::observe::Published;

/// Persistence key for the saved selection.
pub const SELECTION_KEY: &str = "filters";

/// The filter axes that hold toggleable options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterGroupKind {
    Platforms,
    Categories,
    ContentTypes,
    Difficulties,
}

impl FilterGroupKind {
    pub const ALL: [Self; 4] = [
        Self::Platforms,
        Self::Categories,
        Self::ContentTypes,
        Self::Difficulties,
    ];

    /// Query parameter the selected keys of this group are sent under.
    #[must_use]
    pub const fn param_name(self) -> &'static str {
        match self {
            Self::Platforms => "filter[domain_ids][]",
            Self::Categories => "filter[category_ids][]",
            Self::ContentTypes => "filter[content_types][]",
            Self::Difficulties => "filter[difficulties][]",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Platforms => "Platforms",
            Self::Categories => "Categories",
            Self::ContentTypes => "Content Type",
            Self::Difficulties => "Difficulty",
        }
    }
}

/// A single toggleable option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOption {
    /// Value sent to the backend and used for local matching.
    pub key: String,
    pub name: String,
    pub is_on: bool,
}

/// The options of one axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGroup {
    pub kind: FilterGroupKind,
    pub options: Vec<FilterOption>,
}

impl FilterGroup {
    fn new(kind: FilterGroupKind, options: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            kind,
            options: options
                .into_iter()
                .map(|(key, name)| FilterOption {
                    key,
                    name,
                    is_on: false,
                })
                .collect(),
        }
    }

    /// Keys of the options that are switched on.
    pub fn selected_keys(&self) -> impl Iterator<Item = &str> {
        self.options
            .iter()
            .filter(|o| o.is_on)
            .map(|o| o.key.as_str())
    }

    #[must_use]
    pub fn has_selection(&self) -> bool {
        self.options.iter().any(|o| o.is_on)
    }

    fn toggle(&mut self, key: &str) -> bool {
        match self.options.iter_mut().find(|o| o.key == key) {
            Some(option) => {
                option.is_on = !option.is_on;
                true
            }
            None => false,
        }
    }

    fn select_only(&mut self, keys: &HashSet<String>) {
        for option in &mut self.options {
            option.is_on = keys.contains(&option.key);
        }
    }

    /// Rebuilds the options, keeping `keep` switched on where still offered.
    fn rebuild(&mut self, entries: Vec<(String, String)>, keep: &HashSet<String>) {
        self.options = entries
            .into_iter()
            .map(|(key, name)| FilterOption {
                is_on: keep.contains(&key),
                key,
                name,
            })
            .collect();
    }

    fn matches_any<'a>(&self, mut values: impl Iterator<Item = &'a str>) -> bool {
        if !self.has_selection() {
            return true;
        }
        let selected: HashSet<&str> = self.selected_keys().collect();
        values.any(|v| selected.contains(v))
    }
}

/// Listing sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Newest,
    Popularity,
}

impl SortOrder {
    #[must_use]
    pub const fn as_param(self) -> &'static str {
        match self {
            Self::Newest => "-released_at",
            Self::Popularity => "-popularity",
        }
    }
}

/// Restricts a listing to items in one completion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionFilter {
    InProgress,
    Completed,
}

impl CompletionFilter {
    #[must_use]
    pub const fn as_param(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    #[must_use]
    pub const fn matches(self, status: CompletionStatus) -> bool {
        match self {
            Self::InProgress => status.is_in_progress(),
            Self::Completed => status.is_completed(),
        }
    }
}

/// Snapshot of every active predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSet {
    pub platforms: FilterGroup,
    pub categories: FilterGroup,
    pub content_types: FilterGroup,
    pub difficulties: FilterGroup,
    pub completion: Option<CompletionFilter>,
    pub bookmarked_only: bool,
    pub search: Option<String>,
    pub sort: SortOrder,
}

impl Default for FilterSet {
    fn default() -> Self {
        Self {
            platforms: FilterGroup::new(FilterGroupKind::Platforms, []),
            categories: FilterGroup::new(FilterGroupKind::Categories, []),
            content_types: FilterGroup::new(
                FilterGroupKind::ContentTypes,
                [ContentKind::Collection, ContentKind::Screencast]
                    .map(|k| (k.as_param().to_string(), k.label().to_string())),
            ),
            difficulties: FilterGroup::new(
                FilterGroupKind::Difficulties,
                Difficulty::ALL.map(|d| (d.as_param().to_string(), d.label().to_string())),
            ),
            completion: None,
            bookmarked_only: false,
            search: None,
            sort: SortOrder::default(),
        }
    }
}

impl FilterSet {
    #[must_use]
    pub const fn group(&self, kind: FilterGroupKind) -> &FilterGroup {
        match kind {
            FilterGroupKind::Platforms => &self.platforms,
            FilterGroupKind::Categories => &self.categories,
            FilterGroupKind::ContentTypes => &self.content_types,
            FilterGroupKind::Difficulties => &self.difficulties,
        }
    }

    const fn group_mut(&mut self, kind: FilterGroupKind) -> &mut FilterGroup {
        match kind {
            FilterGroupKind::Platforms => &mut self.platforms,
            FilterGroupKind::Categories => &mut self.categories,
            FilterGroupKind::ContentTypes => &mut self.content_types,
            FilterGroupKind::Difficulties => &mut self.difficulties,
        }
    }

    /// Number of switched-on predicates, as shown on a filter badge.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        FilterGroupKind::ALL
            .iter()
            .map(|&k| self.group(k).selected_keys().count())
            .sum::<usize>()
            + usize::from(self.completion.is_some())
            + usize::from(self.bookmarked_only)
            + usize::from(self.search.is_some())
    }

    /// Evaluates the predicates against a single item.
    #[must_use]
    pub fn matches(&self, item: &ContentSummary) -> bool {
        let domain_keys: Vec<String> = item.domain_ids.iter().map(u64::to_string).collect();
        let category_keys: Vec<String> = item.category_ids.iter().map(u64::to_string).collect();

        self.platforms.matches_any(domain_keys.iter().map(String::as_str))
            && self.categories.matches_any(category_keys.iter().map(String::as_str))
            && self
                .content_types
                .matches_any(std::iter::once(item.kind.as_param()))
            && self
                .difficulties
                .matches_any(item.difficulty.map(Difficulty::as_param).into_iter())
            && self.completion.is_none_or(|c| c.matches(item.completion))
            && (!self.bookmarked_only || item.bookmarked)
            && self.search.as_deref().is_none_or(|q| {
                item.name.to_lowercase().contains(&q.to_lowercase())
            })
    }

    /// Renders the predicates as catalog query parameters.
    #[must_use]
    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = FilterGroupKind::ALL
            .iter()
            .flat_map(|&kind| {
                self.group(kind)
                    .selected_keys()
                    .map(move |key| (kind.param_name().to_string(), key.to_string()))
            })
            .collect();

        if let Some(completion) = self.completion {
            params.push((
                "filter[completion_status]".to_string(),
                completion.as_param().to_string(),
            ));
        }
        if self.bookmarked_only {
            params.push(("filter[bookmarked]".to_string(), "true".to_string()));
        }
        if let Some(ref q) = self.search {
            params.push(("filter[q]".to_string(), q.clone()));
        }
        params.push(("sort".to_string(), self.sort.as_param().to_string()));
        params
    }

    /// The persistable part of the set.
    #[must_use]
    pub fn selection(&self) -> FilterSelection {
        let keys = |kind| {
            self.group(kind)
                .selected_keys()
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        FilterSelection {
            platforms: keys(FilterGroupKind::Platforms),
            categories: keys(FilterGroupKind::Categories),
            content_types: keys(FilterGroupKind::ContentTypes),
            difficulties: keys(FilterGroupKind::Difficulties),
            completion: self.completion,
            bookmarked_only: self.bookmarked_only,
            search: self.search.clone(),
            sort: self.sort,
        }
    }
}

/// Saved form of the user's filter choices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSelection {
    pub platforms: Vec<String>,
    pub categories: Vec<String>,
    pub content_types: Vec<String>,
    pub difficulties: Vec<String>,
    pub completion: Option<CompletionFilter>,
    pub bookmarked_only: bool,
    pub search: Option<String>,
    pub sort: SortOrder,
}

impl FilterSelection {
    fn keys(&self, kind: FilterGroupKind) -> &[String] {
        match kind {
            FilterGroupKind::Platforms => &self.platforms,
            FilterGroupKind::Categories => &self.categories,
            FilterGroupKind::ContentTypes => &self.content_types,
            FilterGroupKind::Difficulties => &self.difficulties,
        }
    }
}

/// Owner of the session's [`FilterSet`].
#[derive(Debug)]
pub struct FilterStore {
    set: Published<FilterSet>,
    /// Restored selections for reference-backed groups whose data has not
    /// arrived yet.
    pending: HashMap<FilterGroupKind, HashSet<String>>,
}

impl Default for FilterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            set: Published::new(FilterSet::default()),
            pending: HashMap::new(),
        }
    }

    /// Builds a store from a saved selection.
    ///
    /// Fixed groups are applied immediately. Platform and category keys are
    /// held back until the matching reference data is known.
    #[must_use]
    pub fn restored(selection: &FilterSelection) -> Self {
        let mut store = Self::new();
        store.set.modify(|set| {
            for kind in [FilterGroupKind::ContentTypes, FilterGroupKind::Difficulties] {
                let keys: HashSet<String> = selection.keys(kind).iter().cloned().collect();
                set.group_mut(kind).select_only(&keys);
            }
            set.completion = selection.completion;
            set.bookmarked_only = selection.bookmarked_only;
            set.search.clone_from(&selection.search);
            set.sort = selection.sort;
            true
        });
        for kind in [FilterGroupKind::Platforms, FilterGroupKind::Categories] {
            let keys: HashSet<String> = selection.keys(kind).iter().cloned().collect();
            if !keys.is_empty() {
                store.pending.insert(kind, keys);
            }
        }
        store
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<FilterSet> {
        self.set.snapshot()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<FilterSet>> {
        self.set.subscribe()
    }

    /// Replaces the platform options with one per domain.
    pub fn update_platform_filters(&mut self, domains: &[Domain]) -> bool {
        let entries = domains
            .iter()
            .map(|d| (d.id.to_string(), d.name.clone()))
            .collect();
        self.rebuild_group(FilterGroupKind::Platforms, entries)
    }

    /// Replaces the category options with one per category.
    pub fn update_category_filters(&mut self, categories: &[Category]) -> bool {
        let entries = categories
            .iter()
            .map(|c| (c.id.to_string(), c.name.clone()))
            .collect();
        self.rebuild_group(FilterGroupKind::Categories, entries)
    }

    fn rebuild_group(&mut self, kind: FilterGroupKind, entries: Vec<(String, String)>) -> bool {
        let mut keep: HashSet<String> = self
            .set
            .with(|set| set.group(kind).selected_keys().map(str::to_string).collect());
        if let Some(pending) = self.pending.remove(&kind) {
            keep.extend(pending);
        }

        let mut rebuilt = self.set.with(|set| set.group(kind).clone());
        rebuilt.rebuild(entries, &keep);

        let dropped = keep.len().saturating_sub(rebuilt.selected_keys().count());
        if dropped > 0 {
            log::debug!("Dropped {dropped} stale {} selection(s)", kind.label());
        }

        self.set.modify(|set| {
            let group = set.group_mut(kind);
            if *group == rebuilt {
                false
            } else {
                *group = rebuilt;
                true
            }
        })
    }

    /// Flips one option. Returns `false` if the key is not offered.
    pub fn toggle(&mut self, kind: FilterGroupKind, key: &str) -> bool {
        self.set.modify(|set| set.group_mut(kind).toggle(key))
    }

    pub fn set_search(&mut self, query: Option<String>) -> bool {
        let query = query
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());
        self.set.modify(|set| {
            if set.search == query {
                false
            } else {
                set.search = query;
                true
            }
        })
    }

    pub fn set_sort(&mut self, sort: SortOrder) -> bool {
        self.set.modify(|set| {
            let changed = set.sort != sort;
            set.sort = sort;
            changed
        })
    }

    pub fn set_completion(&mut self, completion: Option<CompletionFilter>) -> bool {
        self.set.modify(|set| {
            let changed = set.completion != completion;
            set.completion = completion;
            changed
        })
    }

    pub fn set_bookmarked_only(&mut self, on: bool) -> bool {
        self.set.modify(|set| {
            let changed = set.bookmarked_only != on;
            set.bookmarked_only = on;
            changed
        })
    }

    /// Switches every predicate off. Search text and sort order reset too.
    pub fn clear(&mut self) -> bool {
        self.pending.clear();
        self.set.modify(|set| {
            let before = set.clone();
            for kind in FilterGroupKind::ALL {
                set.group_mut(kind).select_only(&HashSet::new());
            }
            set.completion = None;
            set.bookmarked_only = false;
            set.search = None;
            set.sort = SortOrder::default();
            *set != before
        })
    }

    /// The current selection, including restored keys still waiting for
    /// reference data.
    #[must_use]
    pub fn selection(&self) -> FilterSelection {
        let mut selection = self.set.with(FilterSet::selection);
        for (kind, keys) in &self.pending {
            let target = match kind {
                FilterGroupKind::Platforms => &mut selection.platforms,
                FilterGroupKind::Categories => &mut selection.categories,
                FilterGroupKind::ContentTypes | FilterGroupKind::Difficulties => continue,
            };
            let mut extra: Vec<String> = keys.iter().cloned().collect();
            extra.sort();
            target.extend(extra);
        }
        selection
    }
}
