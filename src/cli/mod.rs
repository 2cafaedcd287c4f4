//! CLI mode for coursedeck - browse, track and download from the terminal.

mod progress;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::coordinator::{Command, SessionViews};
use crate::filter::{CompletionFilter, FilterGroupKind, FilterSet, SortOrder};
use crate::model::{ContentId, ContentSummary, LoadState};
use crate::shell::{MyTutorialsSection, Tab, TabNav};
use crate::{
    AppConfig, Backend, DownloadProgress, Error, FileSessionProvider, FileStore, ListKind,
    PersistenceStore, RestClient, Result, SessionHandle, Sessions, TokenCipher, User,
};

use progress::{
    BarProgress, print_content_list, print_downloads, print_filters, print_summary,
};

/// Environment variables read by `login`.
pub const USER_ID_ENV: &str = "COURSEDECK_USER_ID";
pub const USERNAME_ENV: &str = "COURSEDECK_USERNAME";
pub const TOKEN_ENV: &str = "COURSEDECK_TOKEN";

const SETTLE_POLL: Duration = Duration::from_millis(50);
/// A reference completion can restart the library load right after it
/// reports done, so a settled state must hold for this long.
const SETTLE_GRACE: Duration = Duration::from_millis(100);

/// Filter changes requested on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterArgs {
    pub clear: bool,
    /// Options to flip, by key or display name.
    pub toggles: Vec<(FilterGroupKind, String)>,
    /// `Some(None)` clears the search text.
    pub search: Option<Option<String>>,
    pub sort: Option<SortOrder>,
    pub completion: Option<Option<CompletionFilter>>,
    pub bookmarked_only: Option<bool>,
}

impl FilterArgs {
    fn is_empty(&self) -> bool {
        !self.clear
            && self.toggles.is_empty()
            && self.search.is_none()
            && self.sort.is_none()
            && self.completion.is_none()
            && self.bookmarked_only.is_none()
    }

    /// Resolves the arguments against the offered options.
    fn commands(&self, filters: &FilterSet) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.clear {
            commands.push(Command::ClearFilters);
        }
        for (group, wanted) in &self.toggles {
            let option = filters.group(*group).options.iter().find(|o| {
                o.key == *wanted || o.name.eq_ignore_ascii_case(wanted)
            });
            match option {
                Some(option) => commands.push(Command::ToggleFilter {
                    group: *group,
                    key: option.key.clone(),
                }),
                None => log::warn!("No {} option named {wanted}", group.label()),
            }
        }
        if let Some(search) = &self.search {
            commands.push(Command::SetSearch(search.clone()));
        }
        if let Some(sort) = self.sort {
            commands.push(Command::SetSort(sort));
        }
        if let Some(completion) = self.completion {
            commands.push(Command::SetCompletionFilter(completion));
        }
        if let Some(on) = self.bookmarked_only {
            commands.push(Command::SetBookmarkedOnly(on));
        }
        commands
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Login,
    Logout,
    Library { filters: FilterArgs, pages: usize },
    Tutorials(Option<MyTutorialsSection>),
    Downloads,
    Filters(FilterArgs),
    Progress { id: ContentId, percent: u8 },
    Complete(ContentId),
    Bookmark(ContentId),
    Download { ids: Vec<ContentId>, force: bool },
    DeleteDownload(ContentId),
}

pub fn print_usage() {
    eprintln!("Usage: coursedeck <COMMAND> [OPTIONS]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  login                   Save the user from {USER_ID_ENV}, {USERNAME_ENV}, {TOKEN_ENV}");
    eprintln!("  logout                  Forget the saved user");
    eprintln!("  library [FILTERS]       List the catalog (--pages <N> to load more)");
    eprintln!("  tutorials [SECTION]     In-progress, completed and bookmarked items");
    eprintln!("                          (SECTION: in-progress | completed | bookmarked)");
    eprintln!("  downloads               List offline videos");
    eprintln!("  filters [FILTERS]       Show or change the saved library filters");
    eprintln!("  progress <ID> <PCT>     Record how far you got through an item");
    eprintln!("  complete <ID>           Mark an item completed");
    eprintln!("  bookmark <ID>           Toggle a bookmark");
    eprintln!("  download [-f] <ID>...   Download videos for offline viewing");
    eprintln!("  delete-download <ID>    Remove an offline video");
    eprintln!();
    eprintln!("Filters:");
    eprintln!("  --platform <NAME>       Toggle a platform");
    eprintln!("  --category <NAME>       Toggle a category");
    eprintln!("  --type <TYPE>           Toggle a content type (collection, screencast)");
    eprintln!("  --difficulty <LEVEL>    Toggle a difficulty");
    eprintln!("  --search <TEXT>         Search text (empty to clear)");
    eprintln!("  --sort <ORDER>          newest | popularity");
    eprintln!("  --completion <STATE>    in-progress | completed | any");
    eprintln!("  --bookmarked <BOOL>     Only bookmarked items");
    eprintln!("  --clear                 Reset every filter");
}

fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> std::result::Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_id(arg: Option<&String>) -> std::result::Result<ContentId, String> {
    let arg = arg.ok_or("missing content id")?;
    arg.parse()
        .map(ContentId)
        .map_err(|_| format!("invalid content id: {arg}"))
}

fn parse_filters(args: &[String]) -> std::result::Result<(FilterArgs, usize), String> {
    let mut filters = FilterArgs::default();
    let mut pages = 1;
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--platform" => filters
                .toggles
                .push((FilterGroupKind::Platforms, value(args, &mut i, flag)?.into())),
            "--category" => filters
                .toggles
                .push((FilterGroupKind::Categories, value(args, &mut i, flag)?.into())),
            "--type" => filters
                .toggles
                .push((FilterGroupKind::ContentTypes, value(args, &mut i, flag)?.into())),
            "--difficulty" => filters
                .toggles
                .push((FilterGroupKind::Difficulties, value(args, &mut i, flag)?.into())),
            "--search" => {
                let text = value(args, &mut i, flag)?;
                filters.search = Some((!text.is_empty()).then(|| text.to_string()));
            }
            "--sort" => {
                filters.sort = Some(match value(args, &mut i, flag)? {
                    "newest" => SortOrder::Newest,
                    "popularity" => SortOrder::Popularity,
                    other => return Err(format!("unknown sort order: {other}")),
                });
            }
            "--completion" => {
                filters.completion = Some(match value(args, &mut i, flag)? {
                    "in-progress" => Some(CompletionFilter::InProgress),
                    "completed" => Some(CompletionFilter::Completed),
                    "any" => None,
                    other => return Err(format!("unknown completion state: {other}")),
                });
            }
            "--bookmarked" => {
                let on = value(args, &mut i, flag)?;
                filters.bookmarked_only =
                    Some(on.parse().map_err(|_| format!("not a boolean: {on}"))?);
            }
            "--clear" => filters.clear = true,
            "--pages" => {
                let n = value(args, &mut i, flag)?;
                pages = n.parse().map_err(|_| format!("invalid page count: {n}"))?;
            }
            other => return Err(format!("unknown option: {other}")),
        }
        i += 1;
    }
    Ok((filters, pages))
}

/// Parses everything after the program name. `Ok(None)` means help was
/// asked for.
///
/// # Errors
///
/// Returns a message describing the first invalid argument.
pub fn parse_args(args: &[String]) -> std::result::Result<Option<CliCommand>, String> {
    let Some((name, rest)) = args.split_first() else {
        return Ok(None);
    };
    let command = match name.as_str() {
        "-h" | "--help" | "help" => return Ok(None),
        "login" => CliCommand::Login,
        "logout" => CliCommand::Logout,
        "library" => {
            let (filters, pages) = parse_filters(rest)?;
            CliCommand::Library {
                filters,
                pages: pages.max(1),
            }
        }
        "filters" => {
            let (filters, _) = parse_filters(rest)?;
            CliCommand::Filters(filters)
        }
        "tutorials" => CliCommand::Tutorials(match rest.first().map(String::as_str) {
            None => None,
            Some("in-progress") => Some(MyTutorialsSection::InProgress),
            Some("completed") => Some(MyTutorialsSection::Completed),
            Some("bookmarked") => Some(MyTutorialsSection::Bookmarked),
            Some(other) => return Err(format!("unknown section: {other}")),
        }),
        "downloads" => CliCommand::Downloads,
        "progress" => {
            let id = parse_id(rest.first())?;
            let pct = rest.get(1).ok_or("missing percentage")?;
            let percent = pct
                .parse()
                .map_err(|_| format!("invalid percentage: {pct}"))?;
            CliCommand::Progress { id, percent }
        }
        "complete" => CliCommand::Complete(parse_id(rest.first())?),
        "bookmark" => CliCommand::Bookmark(parse_id(rest.first())?),
        "download" => {
            let force = rest.iter().any(|a| a == "-f" || a == "--force");
            let ids = rest
                .iter()
                .filter(|a| !a.starts_with('-'))
                .map(|a| parse_id(Some(a)))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            if ids.is_empty() {
                return Err("download needs at least one content id".into());
            }
            CliCommand::Download { ids, force }
        }
        "delete-download" => CliCommand::DeleteDownload(parse_id(rest.first())?),
        other => return Err(format!("unknown command: {other}")),
    };
    Ok(Some(command))
}

/// Gets the user to sign in from environment variables.
fn user_from_env() -> Result<User> {
    let var = |name: &str| {
        std::env::var(name).map_err(|_| Error::Config(format!("{name} environment variable not set")))
    };
    let id = var(USER_ID_ENV)?;
    Ok(User {
        id: id
            .parse()
            .map_err(|_| Error::Config(format!("{USER_ID_ENV} is not a number: {id}")))?,
        username: var(USERNAME_ENV)?,
        token: var(TOKEN_ENV)?,
    })
}

fn settled(views: &SessionViews, kinds: &[ListKind]) -> bool {
    let busy = |state: &LoadState| matches!(state, LoadState::Initial | LoadState::Loading);
    views.domains.borrow().in_flight == 0
        && views.categories.borrow().in_flight == 0
        && kinds.iter().all(|&kind| !busy(&views.list(kind).borrow().state))
}

/// Waits until reference data and `kinds` have finished loading, or `limit`
/// has passed.
async fn settle(views: &SessionViews, kinds: &[ListKind], limit: Duration) {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if settled(views, kinds) {
            tokio::time::sleep(SETTLE_GRACE).await;
            if settled(views, kinds) {
                return;
            }
        }
        tokio::time::sleep(SETTLE_POLL).await;
    }
    log::warn!("Still loading after {}s, showing what arrived", limit.as_secs());
}

/// Sends `commands` followed by a library refresh and waits for the reload
/// they cause to finish.
async fn apply_and_reload(session: &SessionHandle, commands: Vec<Command>, limit: Duration) -> Result<()> {
    let mut library = session.views().list(ListKind::Library);
    library.borrow_and_update();
    for command in commands {
        session.send(command)?;
    }
    session.send(Command::Refresh(ListKind::Library))?;
    tokio::time::timeout(limit, library.changed())
        .await
        .map_err(|_| Error::Cancelled)?
        .map_err(|_| Error::SessionClosed)?;
    settle(session.views(), &[ListKind::Library], limit).await;
    Ok(())
}

fn find_item(views: &SessionViews, id: ContentId) -> Result<ContentSummary> {
    ListKind::ALL
        .into_iter()
        .find_map(|kind| views.list_snapshot(kind).get(id).cloned())
        .ok_or(Error::NotFound(id))
}

fn describe(item: &ContentSummary) {
    println!(
        "{} {}: {:?}{}",
        item.id,
        item.name,
        item.completion,
        if item.bookmarked { ", bookmarked" } else { "" }
    );
}

fn open_sessions(config: &Arc<AppConfig>, provider: Arc<FileSessionProvider>) -> Sessions {
    let api = config.api.clone();
    let paths = config.paths.clone();
    Sessions::new(
        provider,
        Arc::clone(config),
        move |_| Ok(Backend::from_shared(Arc::new(RestClient::new(&api)?))),
        move |user| {
            let store: Arc<dyn PersistenceStore> = Arc::new(FileStore::new(paths.user_dir(user.id)));
            Ok(store)
        },
    )
}

/// Runs one CLI command.
///
/// # Errors
///
/// Returns an error if nobody is signed in, the backend rejects a request,
/// or local state cannot be written.
#[allow(clippy::too_many_lines)]
pub async fn run(config: AppConfig, command: CliCommand) -> Result<()> {
    let config = Arc::new(config);
    let provider = Arc::new(FileSessionProvider::new(
        config.paths.session_file(),
        TokenCipher::machine(),
    ));

    match command {
        CliCommand::Login => {
            let user = user_from_env()?;
            provider.sign_in(&user)?;
            println!("Signed in as {}.", user.username);
            return Ok(());
        }
        CliCommand::Logout => {
            open_sessions(&config, provider).sign_out()?;
            println!("Signed out.");
            return Ok(());
        }
        _ => {}
    }

    let limit = config.api.timeout() * 2;
    let mut sessions = open_sessions(&config, provider);
    let session = sessions.current()?;
    let views = session.views();

    match command {
        CliCommand::Login | CliCommand::Logout => {}
        CliCommand::Library { filters, pages } => {
            settle(views, &[ListKind::Library], limit).await;
            if !filters.is_empty() {
                let commands = filters.commands(&views.filters.borrow());
                apply_and_reload(session, commands, limit).await?;
            }
            let nav = TabNav::new(session);
            for _ in 1..pages {
                if !nav.current().snapshot().has_more() {
                    break;
                }
                let mut library = views.list(ListKind::Library);
                library.borrow_and_update();
                nav.load_more(session)?;
                let _ = tokio::time::timeout(limit, library.changed()).await;
                settle(views, &[ListKind::Library], limit).await;
            }
            let list = nav.contents(Tab::Library).snapshot();
            if let LoadState::Failed(e) = &list.state {
                log::error!("Library failed to load: {e}");
            }
            print_content_list("Library", list.items(), list.total);
        }
        CliCommand::Filters(filters) => {
            settle(views, &[ListKind::Library], limit).await;
            if !filters.is_empty() {
                let commands = filters.commands(&views.filters.borrow());
                apply_and_reload(session, commands, limit).await?;
            }
            print_filters(&views.filters.borrow());
        }
        CliCommand::Tutorials(section) => {
            let kinds = [ListKind::InProgress, ListKind::Completed, ListKind::Bookmarks];
            settle(views, &kinds, limit).await;
            let mut nav = TabNav::new(session);
            let sections = section.map_or(MyTutorialsSection::ALL.to_vec(), |s| vec![s]);
            for section in sections {
                nav.select_section(section);
                let list = nav.current().snapshot();
                print_content_list(section.label(), list.items(), list.total);
            }
        }
        CliCommand::Downloads => print_downloads(&session.downloads().records()),
        CliCommand::Progress { id, percent } => {
            settle(views, &ListKind::ALL, limit).await;
            let item = find_item(views, id)?;
            describe(&session.progress().update_progress(&item, percent).await?);
        }
        CliCommand::Complete(id) => {
            settle(views, &ListKind::ALL, limit).await;
            let item = find_item(views, id)?;
            describe(&session.progress().mark_completed(&item).await?);
        }
        CliCommand::Bookmark(id) => {
            settle(views, &ListKind::ALL, limit).await;
            let item = find_item(views, id)?;
            describe(&session.bookmarks().toggle(&item).await?);
        }
        CliCommand::Download { ids, force } => {
            settle(views, &ListKind::ALL, limit).await;
            let items = ids
                .into_iter()
                .map(|id| find_item(views, id))
                .collect::<Result<Vec<_>>>()?;
            let manager = session.downloads();
            let items: Vec<_> = if force {
                items
            } else {
                items
                    .into_iter()
                    .filter(|item| {
                        let done = manager.is_downloaded(item.id);
                        if done {
                            println!("{} is already downloaded.", item.name);
                        }
                        !done
                    })
                    .collect()
            };
            if items.is_empty() {
                return Ok(());
            }

            let bars = Arc::new(BarProgress::new(0));
            let progress: Arc<dyn DownloadProgress> = bars.clone();
            let stats = manager.download_all(&items, &progress).await;
            bars.finish();
            print_summary(&stats);
        }
        CliCommand::DeleteDownload(id) => {
            let item = session.downloads().delete(id).await?;
            println!("Deleted the offline copy of {}.", item.name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterStore;
    use crate::testing::domain;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn no_arguments_means_help() {
        assert_eq!(parse_args(&[]), Ok(None));
        assert_eq!(parse_args(&args("--help")), Ok(None));
    }

    #[test]
    fn parses_library_filters() {
        let command = parse_args(&args(
            "library --platform ios --type screencast --sort popularity --completion any --pages 3",
        ))
        .unwrap()
        .unwrap();
        let CliCommand::Library { filters, pages } = command else {
            panic!("expected library, got {command:?}");
        };
        assert_eq!(pages, 3);
        assert_eq!(
            filters.toggles,
            vec![
                (FilterGroupKind::Platforms, "ios".to_string()),
                (FilterGroupKind::ContentTypes, "screencast".to_string()),
            ]
        );
        assert_eq!(filters.sort, Some(SortOrder::Popularity));
        assert_eq!(filters.completion, Some(None));
    }

    #[test]
    fn parses_item_commands() {
        assert_eq!(
            parse_args(&args("progress 12 40")),
            Ok(Some(CliCommand::Progress {
                id: ContentId(12),
                percent: 40
            }))
        );
        assert_eq!(
            parse_args(&args("download -f 1 2")),
            Ok(Some(CliCommand::Download {
                ids: vec![ContentId(1), ContentId(2)],
                force: true
            }))
        );
        assert_eq!(
            parse_args(&args("tutorials bookmarked")),
            Ok(Some(CliCommand::Tutorials(Some(
                MyTutorialsSection::Bookmarked
            ))))
        );
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_args(&args("complete abc")).is_err());
        assert!(parse_args(&args("download")).is_err());
        assert!(parse_args(&args("library --sort sideways")).is_err());
        assert!(parse_args(&args("library --search")).is_err());
        assert!(parse_args(&args("frobnicate")).is_err());
    }

    #[test]
    fn filter_names_resolve_to_keys() {
        let mut store = FilterStore::new();
        store.update_platform_filters(&[domain(1, "iOS"), domain(2, "Android")]);
        let filters = FilterArgs {
            toggles: vec![
                (FilterGroupKind::Platforms, "android".to_string()),
                (FilterGroupKind::Platforms, "1".to_string()),
                (FilterGroupKind::Platforms, "windows".to_string()),
            ],
            search: Some(None),
            ..FilterArgs::default()
        };
        assert_eq!(
            filters.commands(&store.snapshot()),
            vec![
                Command::ToggleFilter {
                    group: FilterGroupKind::Platforms,
                    key: "2".to_string()
                },
                Command::ToggleFilter {
                    group: FilterGroupKind::Platforms,
                    key: "1".to_string()
                },
                Command::SetSearch(None),
            ]
        );
    }
}
