//! File system seam used by the download manager.

use std::path::Path;

use async_trait::async_trait;

#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Size of the file at `path`, or `None` if it does not exist.
    async fn file_size(&self, path: &Path) -> Option<u64>;

    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;

    /// Creates (or truncates) a file for writing.
    async fn create_file(&self, path: &Path) -> std::io::Result<tokio::fs::File>;

    async fn rename_file(&self, from: &Path, to: &Path) -> std::io::Result<()>;

    /// Removes a file. A missing file is not an error.
    async fn remove_file(&self, path: &Path) -> std::io::Result<()>;
}

/// [`FileSystem`] backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for TokioFileSystem {
    async fn file_size(&self, path: &Path) -> Option<u64> {
        tokio::fs::metadata(path).await.ok().map(|m| m.len())
    }

    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn create_file(&self, path: &Path) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::create(path).await
    }

    async fn rename_file(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
