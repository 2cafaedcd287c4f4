//! Application configuration, loaded from a TOML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable overriding [`ApiConfig::base_url`].
pub const API_URL_ENV: &str = "COURSEDECK_API_URL";
/// Environment variable overriding [`PathConfig::download_dir`].
pub const DOWNLOAD_DIR_ENV: &str = "COURSEDECK_DOWNLOAD_DIR";

const TEMPLATE_HEADER: &str = "\
# coursedeck configuration
#
# [api]        backend location and paging
# [paths]      where cached data and downloaded videos live
# [downloads]  offline download behaviour
";

/// Video rendition to request for offline downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    Sd,
    #[default]
    Hd,
}

impl VideoQuality {
    #[must_use]
    pub const fn as_param(self) -> &'static str {
        match self {
            Self::Sd => "sd",
            Self::Hd => "hd",
        }
    }
}

/// Configuration for offline downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Number of videos downloaded at the same time.
    pub concurrent_downloads: usize,
    /// Whether to re-download a video that is already on disk.
    pub force_overwrite: bool,
    /// Whether to clean up `.part` files on download error.
    pub cleanup_on_error: bool,
    pub quality: VideoQuality,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrent_downloads: 2,
            force_overwrite: false,
            cleanup_on_error: true,
            quality: VideoQuality::default(),
        }
    }
}

impl DownloadConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_concurrent_downloads(mut self, concurrent: usize) -> Self {
        self.concurrent_downloads = concurrent;
        self
    }

    #[must_use]
    pub const fn with_force_overwrite(mut self, force: bool) -> Self {
        self.force_overwrite = force;
        self
    }

    #[must_use]
    pub const fn with_cleanup_on_error(mut self, cleanup: bool) -> Self {
        self.cleanup_on_error = cleanup;
        self
    }

    #[must_use]
    pub const fn with_quality(mut self, quality: VideoQuality) -> Self {
        self.quality = quality;
        self
    }
}

/// Backend location and paging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Items requested per content page.
    pub page_size: usize,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.coursedeck.dev/api".to_string(),
            page_size: 20,
            timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Directories for cached data and downloaded videos.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Cached reference data, filter selections, and the download ledger.
    pub data_dir: PathBuf,
    /// Where downloaded videos are saved.
    pub download_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coursedeck");
        Self {
            download_dir: data_dir.join("downloads"),
            data_dir,
        }
    }
}

impl PathConfig {
    /// Per-user directory under [`data_dir`](Self::data_dir).
    #[must_use]
    pub fn user_dir(&self, user_id: u64) -> PathBuf {
        self.data_dir.join("users").join(user_id.to_string())
    }

    /// File holding the signed-in user.
    #[must_use]
    pub fn session_file(&self) -> PathBuf {
        self.data_dir.join("session.toml")
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub paths: PathConfig,
    pub downloads: DownloadConfig,
}

impl AppConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `$XDG_CONFIG_HOME/coursedeck/config.toml` or the platform equivalent.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coursedeck")
            .join("config.toml")
    }

    /// Parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, writing a template with default values first if it does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the template cannot be written or the file cannot
    /// be parsed.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            log::info!("Wrote default config to {}", path.display());
            return Ok(config);
        }
        Self::load(path)
    }

    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot
    /// be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let body = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, format!("{TEMPLATE_HEADER}\n{body}"))?;
        Ok(())
    }

    /// Applies `COURSEDECK_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            self.api.base_url = url;
        }
        if let Ok(dir) = std::env::var(DOWNLOAD_DIR_ENV) {
            self.paths.download_dir = PathBuf::from(dir);
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(Error::Config("api.base_url must not be empty".into()));
        }
        if self.api.page_size == 0 {
            return Err(Error::Config("api.page_size must be at least 1".into()));
        }
        if self.downloads.concurrent_downloads == 0 {
            return Err(Error::Config(
                "downloads.concurrent_downloads must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
