//! Offline downloads.
//!
//! Videos are streamed to `<dir>/<id>.mp4.part` and renamed into place once
//! complete. Finished downloads are recorded in a [`DownloadLedger`] kept in
//! the session's persistence store; the ledger decides what the Downloads
//! list shows. One [`SharedLedger`] per session serializes every write to it.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::backend::VideoSource;
use crate::config::DownloadConfig;
use crate::coordinator::UpdateSink;
use crate::error::{Error, Result};
use crate::fs::{FileSystem, TokioFileSystem};
use crate::model::{ContentChange, ContentId, ContentSummary, DownloadStatus};
use crate::persist::{PersistenceStore, load_json, save_json};
use crate::session::User;
use crate::stats::{BatchStats, TransferMeter, TransferStats};

/// Persistence key of the ledger.
pub const LEDGER_KEY: &str = "downloads";

/// Receives download progress. All methods default to no-ops.
pub trait DownloadProgress: Send + Sync {
    fn on_start(&self, _item: &ContentSummary, _size: Option<u64>) {}

    /// Called per received chunk with the bytes added since the last call.
    fn on_progress(&self, _id: ContentId, _bytes_delta: u64, _speed: u64) {}

    fn on_complete(&self, _item: &ContentSummary, _stats: &TransferStats) {}

    fn on_error(&self, _id: ContentId, _error: &str) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl DownloadProgress for NoProgress {}

/// A finished download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// The item as last confirmed, marked as downloaded.
    pub content: ContentSummary,
    pub file: PathBuf,
    pub size: u64,
    pub downloaded_at: DateTime<Utc>,
}

/// All finished downloads, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLedger {
    records: Vec<DownloadRecord>,
}

impl DownloadLedger {
    /// Reads the ledger from `store`. A missing or unreadable ledger is empty.
    #[must_use]
    pub fn load(store: &dyn PersistenceStore) -> Self {
        match load_json(store, LEDGER_KEY) {
            Ok(ledger) => ledger.unwrap_or_default(),
            Err(e) => {
                log::warn!("Ignoring unreadable download ledger: {e}");
                Self::default()
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn save(&self, store: &dyn PersistenceStore) -> Result<()> {
        save_json(store, LEDGER_KEY, self)
    }

    #[must_use]
    pub fn records(&self) -> &[DownloadRecord] {
        &self.records
    }

    #[must_use]
    pub fn get(&self, id: ContentId) -> Option<&DownloadRecord> {
        self.records.iter().find(|r| r.content.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: ContentId) -> bool {
        self.get(id).is_some()
    }

    /// The downloaded items, in ledger order.
    #[must_use]
    pub fn summaries(&self) -> Vec<ContentSummary> {
        self.records.iter().map(|r| r.content.clone()).collect()
    }

    fn get_mut(&mut self, id: ContentId) -> Option<&mut DownloadRecord> {
        self.records.iter_mut().find(|r| r.content.id == id)
    }

    fn upsert(&mut self, record: DownloadRecord) -> Option<DownloadRecord> {
        let previous = self.remove(record.content.id);
        self.records.insert(0, record);
        previous
    }

    fn remove(&mut self, id: ContentId) -> Option<DownloadRecord> {
        let index = self.records.iter().position(|r| r.content.id == id)?;
        Some(self.records.remove(index))
    }

    /// Merges a confirmed change into the stored copy of `id`. Download state
    /// belongs to the ledger itself and is not changed this way.
    fn apply_change(&mut self, id: ContentId, change: ContentChange) -> bool {
        if matches!(change, ContentChange::Download(_)) {
            return false;
        }
        self.get_mut(id)
            .is_some_and(|record| change.apply(&mut record.content))
    }

    /// Swaps the stored copy of `item` for `item`, still marked downloaded.
    fn refresh(&mut self, item: &ContentSummary) -> bool {
        let Some(record) = self.get_mut(item.id) else {
            return false;
        };
        let mut content = item.clone();
        content.download = DownloadStatus::Downloaded;
        if record.content == content {
            return false;
        }
        record.content = content;
        true
    }
}

/// The ledger together with the store it is saved to.
///
/// A session holds exactly one, shared by its [`DownloadManager`] and its
/// coordinator, so downloads, deletions and confirmed progress or bookmark
/// changes all go through the same lock and the same saved copy.
pub struct SharedLedger {
    store: Arc<dyn PersistenceStore>,
    ledger: Mutex<DownloadLedger>,
}

impl fmt::Debug for SharedLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedLedger")
            .field("records", &self.lock().records().len())
            .finish_non_exhaustive()
    }
}

impl SharedLedger {
    /// Loads the ledger saved in `store`.
    #[must_use]
    pub fn open(store: Arc<dyn PersistenceStore>) -> Self {
        let ledger = DownloadLedger::load(store.as_ref());
        Self {
            store,
            ledger: Mutex::new(ledger),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DownloadLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn records(&self) -> Vec<DownloadRecord> {
        self.lock().records().to_vec()
    }

    #[must_use]
    pub fn get(&self, id: ContentId) -> Option<DownloadRecord> {
        self.lock().get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: ContentId) -> bool {
        self.lock().contains(id)
    }

    #[must_use]
    pub fn summaries(&self) -> Vec<ContentSummary> {
        self.lock().summaries()
    }

    /// Merges a confirmed progress or bookmark change into the record for
    /// `id`, if there is one. Returns whether the ledger changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be saved; it is left unchanged.
    pub fn apply_change(&self, id: ContentId, change: ContentChange) -> Result<bool> {
        self.commit(|ledger| {
            ledger.apply_change(id, change);
        })
    }

    /// Replaces the stored copy of a downloaded item with `item`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be saved; it is left unchanged.
    pub fn refresh(&self, item: &ContentSummary) -> Result<bool> {
        self.commit(|ledger| {
            ledger.refresh(item);
        })
    }

    /// Applies `change` and saves the result, rolling back if the save
    /// fails. Returns whether anything changed.
    fn commit(&self, change: impl FnOnce(&mut DownloadLedger)) -> Result<bool> {
        let mut ledger = self.lock();
        let before = ledger.clone();
        change(&mut ledger);
        if *ledger == before {
            return Ok(false);
        }
        if let Err(e) = ledger.save(self.store.as_ref()) {
            *ledger = before;
            return Err(e);
        }
        Ok(true)
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// How a single download ended.
enum Outcome {
    /// Already on disk; nothing was transferred.
    Skipped(DownloadRecord),
    Downloaded(DownloadRecord, TransferStats),
}

impl Outcome {
    fn into_record(self) -> DownloadRecord {
        match self {
            Self::Skipped(record) | Self::Downloaded(record, _) => record,
        }
    }
}

/// Downloads videos for one user and keeps the ledger in step.
pub struct DownloadManager<F: FileSystem = TokioFileSystem> {
    user: User,
    videos: Arc<dyn VideoSource>,
    ledger: Arc<SharedLedger>,
    dir: PathBuf,
    config: DownloadConfig,
    sink: UpdateSink,
    fs: F,
}

impl<F: FileSystem> fmt::Debug for DownloadManager<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadManager")
            .field("user", &self.user)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl DownloadManager<TokioFileSystem> {
    #[must_use]
    pub fn new(
        user: User,
        videos: Arc<dyn VideoSource>,
        ledger: Arc<SharedLedger>,
        dir: PathBuf,
        config: DownloadConfig,
        sink: UpdateSink,
    ) -> Self {
        Self::with_fs(user, videos, ledger, dir, config, sink, TokioFileSystem)
    }
}

impl<F: FileSystem> DownloadManager<F> {
    #[must_use]
    pub const fn with_fs(
        user: User,
        videos: Arc<dyn VideoSource>,
        ledger: Arc<SharedLedger>,
        dir: PathBuf,
        config: DownloadConfig,
        sink: UpdateSink,
        fs: F,
    ) -> Self {
        Self {
            user,
            videos,
            ledger,
            dir,
            config,
            sink,
            fs,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, id: ContentId) -> PathBuf {
        self.dir.join(format!("{id}.mp4"))
    }

    #[must_use]
    pub fn records(&self) -> Vec<DownloadRecord> {
        self.ledger.records()
    }

    #[must_use]
    pub fn is_downloaded(&self, id: ContentId) -> bool {
        self.ledger.contains(id)
    }

    /// Downloads `item`'s video. An item already in the ledger whose file is
    /// still on disk is returned as-is unless `force_overwrite` is set.
    ///
    /// On success the ledger is saved and the change is announced to the
    /// session. On failure nothing is announced and the `.part` file is
    /// removed if `cleanup_on_error` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the video cannot be fetched or written, if the
    /// ledger cannot be saved, or [`Error::Cancelled`] if `cancel` fires.
    pub async fn download(
        &self,
        item: &ContentSummary,
        progress: &Arc<dyn DownloadProgress>,
        cancel: Option<CancellationToken>,
    ) -> Result<DownloadRecord> {
        self.fetch(item, progress, cancel)
            .await
            .map(Outcome::into_record)
    }

    async fn fetch(
        &self,
        item: &ContentSummary,
        progress: &Arc<dyn DownloadProgress>,
        cancel: Option<CancellationToken>,
    ) -> Result<Outcome> {
        let path = self.path_for(item.id);

        if !self.config.force_overwrite
            && let Some(record) = self.ledger.get(item.id)
            && self.fs.file_size(&record.file).await == Some(record.size)
        {
            log::info!("Skipping {}: already downloaded", item.id);
            return Ok(Outcome::Skipped(record));
        }

        let part = part_path(&path);
        let transfer = self.transfer(item, &part, progress);
        let result = match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => Err(Error::Cancelled),
                result = transfer => result,
            },
            None => transfer.await,
        };

        let stats = match result {
            Ok(stats) => stats,
            Err(e) => {
                if self.config.cleanup_on_error
                    && let Err(cleanup) = self.fs.remove_file(&part).await
                {
                    log::warn!("Failed to remove {}: {cleanup}", part.display());
                }
                if !matches!(e, Error::Cancelled) {
                    log::error!("Download of {} failed: {e}", item.id);
                    progress.on_error(item.id, &e.to_string());
                }
                return Err(e);
            }
        };

        self.fs.rename_file(&part, &path).await?;

        let mut content = item.clone();
        content.download = DownloadStatus::Downloaded;
        let record = DownloadRecord {
            content,
            file: path.clone(),
            size: stats.bytes,
            downloaded_at: Utc::now(),
        };
        if let Err(e) = self.ledger.commit(|ledger| {
            ledger.upsert(record.clone());
        }) {
            // Without a ledger entry the file would be orphaned.
            if let Err(cleanup) = self.fs.remove_file(&path).await {
                log::warn!("Failed to remove {}: {cleanup}", path.display());
            }
            return Err(e);
        }

        log::info!("Downloaded {} to {}", item.id, path.display());
        progress.on_complete(&record.content, &stats);
        self.sink.download_changed(&record.content);
        Ok(Outcome::Downloaded(record, stats))
    }

    async fn transfer(
        &self,
        item: &ContentSummary,
        part: &Path,
        progress: &Arc<dyn DownloadProgress>,
    ) -> Result<TransferStats> {
        self.fs.create_dir_all(&self.dir).await?;

        let video = self
            .videos
            .open_video(&self.user, item.id, self.config.quality)
            .await?;
        progress.on_start(item, video.size);

        let mut file = self.fs.create_file(part).await?;
        let meter = TransferMeter::new();
        let mut body = video.body;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            let delta = chunk.len() as u64;
            let speed = meter.record(delta);
            progress.on_progress(item.id, delta, speed);
        }
        file.flush().await?;
        drop(file);

        if let Some(expected) = video.size
            && meter.bytes() != expected
        {
            return Err(Error::Download(format!(
                "{}: expected {expected} bytes, received {}",
                item.id,
                meter.bytes()
            )));
        }
        Ok(meter.finish())
    }

    /// Downloads several items, `concurrent_downloads` at a time. Failures
    /// are logged and counted; they do not stop the batch. An item listed
    /// more than once is downloaded once.
    pub async fn download_all(
        &self,
        items: &[ContentSummary],
        progress: &Arc<dyn DownloadProgress>,
    ) -> BatchStats {
        let started = std::time::Instant::now();
        let mut batch = BatchStats::default();

        let mut seen = HashSet::new();
        let unique: Vec<&ContentSummary> = items.iter().filter(|i| seen.insert(i.id)).collect();
        if unique.len() < items.len() {
            log::debug!("Ignoring {} repeated item(s)", items.len() - unique.len());
        }

        let results: Vec<_> = stream::iter(unique)
            .map(|item| self.fetch(item, progress, None))
            .buffer_unordered(self.config.concurrent_downloads.max(1))
            .collect()
            .await;

        for result in results {
            match result {
                Ok(Outcome::Skipped(_)) => batch.skipped += 1,
                Ok(Outcome::Downloaded(_, stats)) => batch.add(&stats),
                Err(_) => batch.failed += 1,
            }
        }
        batch.elapsed = started.elapsed();
        batch
    }

    /// Deletes the downloaded file for `id` and drops it from the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id` is not downloaded, or an error if
    /// the ledger cannot be saved.
    pub async fn delete(&self, id: ContentId) -> Result<ContentSummary> {
        let mut removed = None;
        self.ledger.commit(|ledger| removed = ledger.remove(id))?;
        let Some(record) = removed else {
            return Err(Error::NotFound(id));
        };

        if let Err(e) = self.fs.remove_file(&record.file).await {
            log::warn!("Failed to delete {}: {e}", record.file.display());
        }

        let mut content = record.content;
        content.download = DownloadStatus::NotDownloaded;
        log::info!("Deleted download of {id}");
        self.sink.download_changed(&content);
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::SessionEvent;
    use crate::persist::MemoryStore;
    use crate::testing::{FakeBackend, summary, user};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct Setup {
        manager: DownloadManager,
        backend: Arc<FakeBackend>,
        store: Arc<MemoryStore>,
        rx: mpsc::UnboundedReceiver<SessionEvent>,
        _dir: TempDir,
    }

    fn setup(config: DownloadConfig) -> Setup {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new());
        backend.set_video(b"0123456789abcdef".repeat(64));
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = DownloadManager::new(
            user(1),
            backend.clone(),
            Arc::new(SharedLedger::open(store.clone())),
            dir.path().join("videos"),
            config,
            UpdateSink::new(tx),
        );
        Setup {
            manager,
            backend,
            store,
            rx,
            _dir: dir,
        }
    }

    fn no_progress() -> Arc<dyn DownloadProgress> {
        Arc::new(NoProgress)
    }

    #[derive(Default)]
    struct CountingProgress {
        bytes: AtomicU64,
        errors: AtomicU64,
        completed: Mutex<Vec<TransferStats>>,
    }

    impl DownloadProgress for CountingProgress {
        fn on_progress(&self, _id: ContentId, bytes_delta: u64, _speed: u64) {
            self.bytes.fetch_add(bytes_delta, Ordering::Relaxed);
        }

        fn on_complete(&self, _item: &ContentSummary, stats: &TransferStats) {
            self.completed.lock().unwrap().push(stats.clone());
        }

        fn on_error(&self, _id: ContentId, _error: &str) {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn part_path_appends_extension() {
        assert_eq!(part_path(Path::new("v/7.mp4")), PathBuf::from("v/7.mp4.part"));
    }

    #[tokio::test]
    async fn download_writes_file_and_records_it() {
        let mut s = setup(DownloadConfig::default());
        let counting = Arc::new(CountingProgress::default());
        let progress: Arc<dyn DownloadProgress> = counting.clone();

        let record = s.manager.download(&summary(7, "Swift"), &progress, None).await.unwrap();

        assert_eq!(record.size, 1024);
        assert_eq!(record.content.download, DownloadStatus::Downloaded);
        assert_eq!(std::fs::metadata(&record.file).unwrap().len(), 1024);
        assert!(!part_path(&record.file).exists());
        assert_eq!(counting.bytes.load(Ordering::Relaxed), 1024);

        let saved = DownloadLedger::load(s.store.as_ref());
        assert_eq!(saved.records(), [record.clone()]);
        match s.rx.try_recv() {
            Ok(SessionEvent::DownloadChanged(item)) => assert_eq!(*item, record.content),
            other => panic!("expected download fan-out, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn existing_download_is_skipped() {
        let s = setup(DownloadConfig::default());
        s.manager.download(&summary(7, "Swift"), &no_progress(), None).await.unwrap();
        s.manager.download(&summary(7, "Swift"), &no_progress(), None).await.unwrap();
        assert_eq!(s.backend.video_opens(), 1);

        let forced = setup(DownloadConfig::default().with_force_overwrite(true));
        forced.manager.download(&summary(7, "Swift"), &no_progress(), None).await.unwrap();
        forced.manager.download(&summary(7, "Swift"), &no_progress(), None).await.unwrap();
        assert_eq!(forced.backend.video_opens(), 2);
    }

    #[tokio::test]
    async fn broken_stream_cleans_up_without_fan_out() {
        let mut s = setup(DownloadConfig::default());
        s.backend.fail_video(true);
        let counting = Arc::new(CountingProgress::default());
        let progress: Arc<dyn DownloadProgress> = counting.clone();

        let err = s.manager.download(&summary(7, "Swift"), &progress, None).await;
        assert!(err.is_err());
        assert!(!part_path(&s.manager.path_for(ContentId(7))).exists());
        assert!(!s.manager.is_downloaded(ContentId(7)));
        assert!(s.rx.try_recv().is_err());
        assert_eq!(counting.errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn part_file_kept_when_cleanup_disabled() {
        let s = setup(DownloadConfig::default().with_cleanup_on_error(false));
        s.backend.fail_video(true);
        assert!(s.manager.download(&summary(7, "Swift"), &no_progress(), None).await.is_err());
        assert!(part_path(&s.manager.path_for(ContentId(7))).exists());
    }

    #[tokio::test]
    async fn cancelled_download_reports_cancelled() {
        let mut s = setup(DownloadConfig::default());
        let token = CancellationToken::new();
        token.cancel();
        let result = s
            .manager
            .download(&summary(7, "Swift"), &no_progress(), Some(token))
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(s.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delete_removes_file_and_entry() {
        let mut s = setup(DownloadConfig::default());
        let record = s.manager.download(&summary(7, "Swift"), &no_progress(), None).await.unwrap();
        let _ = s.rx.try_recv();

        let content = s.manager.delete(ContentId(7)).await.unwrap();
        assert_eq!(content.download, DownloadStatus::NotDownloaded);
        assert!(!record.file.exists());
        assert!(DownloadLedger::load(s.store.as_ref()).records().is_empty());
        assert!(matches!(s.rx.try_recv(), Ok(SessionEvent::DownloadChanged(_))));

        assert!(matches!(s.manager.delete(ContentId(7)).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn batch_counts_outcomes() {
        let s = setup(DownloadConfig::default().with_concurrent_downloads(3));
        s.manager.download(&summary(1, "a"), &no_progress(), None).await.unwrap();

        let items = [summary(1, "a"), summary(2, "b"), summary(3, "c")];
        let batch = s.manager.download_all(&items, &no_progress()).await;
        assert_eq!(batch.downloaded, 2);
        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.failed, 0);
        assert_eq!(batch.bytes, 2048);
        assert_eq!(s.manager.records().len(), 3);
    }

    #[tokio::test]
    async fn repeated_items_download_once() {
        let s = setup(DownloadConfig::default().with_concurrent_downloads(4));
        let items = [summary(7, "Swift"), summary(7, "Swift"), summary(8, "Rust")];

        let batch = s.manager.download_all(&items, &no_progress()).await;
        assert_eq!(s.backend.video_opens(), 2);
        assert_eq!(batch.downloaded, 2);
        assert_eq!(batch.failed, 0);
        assert_eq!(s.manager.records().len(), 2);
        assert_eq!(
            std::fs::metadata(s.manager.path_for(ContentId(7))).unwrap().len(),
            1024
        );
        assert!(!part_path(&s.manager.path_for(ContentId(7))).exists());
    }

    #[tokio::test]
    async fn batch_totals_come_from_each_transfer() {
        let s = setup(DownloadConfig::default().with_concurrent_downloads(2));
        let counting = Arc::new(CountingProgress::default());
        let progress: Arc<dyn DownloadProgress> = counting.clone();

        let items = [summary(1, "a"), summary(2, "b")];
        let batch = s.manager.download_all(&items, &progress).await;

        let completed = counting.completed.lock().unwrap().clone();
        assert_eq!(completed.len(), 2);
        assert_eq!(batch.bytes, completed.iter().map(|t| t.bytes).sum::<u64>());
        assert_eq!(
            batch.peak_speed,
            completed.iter().map(|t| t.peak_speed).max().unwrap()
        );
    }

    #[tokio::test]
    async fn confirmed_changes_reach_the_saved_record() {
        let s = setup(DownloadConfig::default());
        s.manager.download(&summary(7, "Swift"), &no_progress(), None).await.unwrap();
        let ledger = SharedLedger::open(s.store.clone());

        assert!(ledger.apply_change(ContentId(7), ContentChange::Bookmarked(true)).unwrap());
        assert!(!ledger.apply_change(ContentId(8), ContentChange::Bookmarked(true)).unwrap());
        // Download state is only changed by downloading or deleting.
        assert!(
            !ledger
                .apply_change(ContentId(7), ContentChange::Download(DownloadStatus::NotDownloaded))
                .unwrap()
        );

        let saved = DownloadLedger::load(s.store.as_ref());
        let content = &saved.get(ContentId(7)).unwrap().content;
        assert!(content.bookmarked);
        assert_eq!(content.download, DownloadStatus::Downloaded);
    }

    #[tokio::test]
    async fn ledger_survives_restart() {
        let s = setup(DownloadConfig::default());
        s.manager.download(&summary(7, "Swift"), &no_progress(), None).await.unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let reopened = DownloadManager::new(
            user(1),
            s.backend.clone(),
            Arc::new(SharedLedger::open(s.store.clone())),
            s.manager.dir().to_path_buf(),
            DownloadConfig::default(),
            UpdateSink::new(tx),
        );
        assert!(reopened.is_downloaded(ContentId(7)));
        assert_eq!(reopened.records()[0].content.id, ContentId(7));
    }

    /// Store whose writes always fail.
    struct FullStore;

    impl PersistenceStore for FullStore {
        fn read(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        fn write(&self, _key: &str, _bytes: &[u8]) -> Result<()> {
            Err(std::io::Error::other("disk full").into())
        }

        fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn unsaved_download_is_removed_from_disk() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new());
        backend.set_video(b"0123456789abcdef".repeat(4));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manager = DownloadManager::new(
            user(1),
            backend,
            Arc::new(SharedLedger::open(Arc::new(FullStore))),
            dir.path().join("videos"),
            DownloadConfig::default(),
            UpdateSink::new(tx),
        );

        let result = manager.download(&summary(7, "Swift"), &no_progress(), None).await;
        assert!(matches!(result, Err(Error::Io(_))));
        assert!(!manager.path_for(ContentId(7)).exists());
        assert!(!manager.is_downloaded(ContentId(7)));
        assert!(rx.try_recv().is_err());
    }

    /// File system that refuses to create directories.
    struct ReadOnlyFs;

    #[async_trait]
    impl FileSystem for ReadOnlyFs {
        async fn file_size(&self, _path: &Path) -> Option<u64> {
            None
        }

        async fn create_dir_all(&self, _path: &Path) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"))
        }

        async fn create_file(&self, _path: &Path) -> std::io::Result<tokio::fs::File> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"))
        }

        async fn rename_file(&self, _from: &Path, _to: &Path) -> std::io::Result<()> {
            Ok(())
        }

        async fn remove_file(&self, _path: &Path) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn filesystem_errors_are_returned() {
        let backend = Arc::new(FakeBackend::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manager = DownloadManager::with_fs(
            user(1),
            backend.clone(),
            Arc::new(SharedLedger::open(Arc::new(MemoryStore::new()))),
            PathBuf::from("/nowhere"),
            DownloadConfig::default(),
            UpdateSink::new(tx),
            ReadOnlyFs,
        );
        let result = manager.download(&summary(7, "Swift"), &no_progress(), None).await;
        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(backend.video_opens(), 0);
        assert!(rx.try_recv().is_err());
    }
}
