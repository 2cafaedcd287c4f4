//! Tab navigation over a session's content lists.
//!
//! [`TabNav`] keeps one [`TabContents`] per tab, each bound to the published
//! snapshots of a live [`SessionHandle`]. Nothing here mutates session state;
//! user actions go back through [`Command`]s.

use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use crate::coordinator::{Command, SessionViews};
use crate::error::{Error, Result};
use crate::filter::FilterSet;
use crate::list::{ContentList, ListKind};
use crate::session::SessionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Tab {
    #[default]
    Library,
    Downloads,
    MyTutorials,
}

impl Tab {
    pub const ALL: [Self; 3] = [Self::Library, Self::Downloads, Self::MyTutorials];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Library => "Library",
            Self::Downloads => "Downloads",
            Self::MyTutorials => "My Tutorials",
        }
    }
}

/// Sections of the My Tutorials tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MyTutorialsSection {
    #[default]
    InProgress,
    Completed,
    Bookmarked,
}

impl MyTutorialsSection {
    pub const ALL: [Self; 3] = [Self::InProgress, Self::Completed, Self::Bookmarked];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::Bookmarked => "Bookmarked",
        }
    }

    #[must_use]
    pub const fn list_kind(self) -> ListKind {
        match self {
            Self::InProgress => ListKind::InProgress,
            Self::Completed => ListKind::Completed,
            Self::Bookmarked => ListKind::Bookmarks,
        }
    }
}

/// A contents view bound to one list. Only the library view carries filters.
#[derive(Debug, Clone)]
pub struct TabContents {
    kind: ListKind,
    list: watch::Receiver<Arc<ContentList>>,
    filters: Option<watch::Receiver<Arc<FilterSet>>>,
}

impl TabContents {
    #[must_use]
    pub fn bind(kind: ListKind, views: &SessionViews) -> Self {
        Self {
            kind,
            list: views.list(kind),
            filters: (kind == ListKind::Library).then(|| views.filters.clone()),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ListKind {
        self.kind
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<ContentList> {
        Arc::clone(&self.list.borrow())
    }

    #[must_use]
    pub fn filters(&self) -> Option<Arc<FilterSet>> {
        self.filters.as_ref().map(|rx| Arc::clone(&rx.borrow()))
    }

    /// Waits for the next list snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] once the owning session has stopped.
    pub async fn changed(&mut self) -> Result<Arc<ContentList>> {
        self.list.changed().await.map_err(|_| Error::SessionClosed)?;
        Ok(Arc::clone(&self.list.borrow_and_update()))
    }
}

/// The navigation shell: selected tab plus one contents view per list.
#[derive(Debug)]
pub struct TabNav {
    session: Uuid,
    selected: Tab,
    section: MyTutorialsSection,
    library: TabContents,
    downloads: TabContents,
    in_progress: TabContents,
    completed: TabContents,
    bookmarked: TabContents,
}

impl TabNav {
    #[must_use]
    pub fn new(session: &SessionHandle) -> Self {
        let views = session.views();
        Self {
            session: session.id(),
            selected: Tab::default(),
            section: MyTutorialsSection::default(),
            library: TabContents::bind(ListKind::Library, views),
            downloads: TabContents::bind(ListKind::Downloads, views),
            in_progress: TabContents::bind(ListKind::InProgress, views),
            completed: TabContents::bind(ListKind::Completed, views),
            bookmarked: TabContents::bind(ListKind::Bookmarks, views),
        }
    }

    /// Rebinds every tab to `session` if it is not the one already shown.
    /// Returns whether anything changed. Selection is kept.
    pub fn rebind(&mut self, session: &SessionHandle) -> bool {
        if session.id() == self.session {
            return false;
        }
        log::debug!("Rebinding tabs to session {}", session.id());
        *self = Self {
            selected: self.selected,
            section: self.section,
            ..Self::new(session)
        };
        true
    }

    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session
    }

    #[must_use]
    pub const fn selected(&self) -> Tab {
        self.selected
    }

    #[must_use]
    pub const fn section(&self) -> MyTutorialsSection {
        self.section
    }

    pub const fn select(&mut self, tab: Tab) {
        self.selected = tab;
    }

    /// Selects a My Tutorials section, switching to that tab.
    pub const fn select_section(&mut self, section: MyTutorialsSection) {
        self.selected = Tab::MyTutorials;
        self.section = section;
    }

    /// Contents shown for `tab`. My Tutorials shows its selected section.
    #[must_use]
    pub const fn contents(&self, tab: Tab) -> &TabContents {
        match tab {
            Tab::Library => &self.library,
            Tab::Downloads => &self.downloads,
            Tab::MyTutorials => self.section_contents(self.section),
        }
    }

    #[must_use]
    pub const fn section_contents(&self, section: MyTutorialsSection) -> &TabContents {
        match section {
            MyTutorialsSection::InProgress => &self.in_progress,
            MyTutorialsSection::Completed => &self.completed,
            MyTutorialsSection::Bookmarked => &self.bookmarked,
        }
    }

    #[must_use]
    pub const fn current(&self) -> &TabContents {
        self.contents(self.selected)
    }

    /// Reloads the visible list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has stopped.
    pub fn refresh(&self, session: &SessionHandle) -> Result<()> {
        session.send(Command::Refresh(self.current().kind()))
    }

    /// Requests the next page of the visible list if it has one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has stopped.
    pub fn load_more(&self, session: &SessionHandle) -> Result<()> {
        let current = self.current();
        if current.snapshot().has_more() {
            session.send(Command::LoadMore(current.kind()))?;
        }
        Ok(())
    }
}
