//! Engine configuration file.
//!
//! One TOML file describes the installation the engine manages: where it lives, how
//! to recognise its payload inside a release archive, which GitHub-style repository
//! publishes it, and how directories are merged during an update.
//!
//! # Location
//!
//! Resolved in order: the `--config` flag, the `HOTSWAP_CONFIG` environment variable,
//! then the platform config directory (`~/.config/hotswap/hotswap.toml`,
//! `%APPDATA%\hotswap\hotswap.toml`).
//!
//! # Example
//!
//! ```toml
//! [release]
//! repo = "acme/widget-settings"
//! asset_patterns = ["Widget-Settings-*.zip", "*.zip"]
//!
//! [install]
//! install_dir = "C:/Program Files/Widget Settings"
//! entry_file = "WidgetSettings.exe"
//! product_name = "Widget Settings"
//! required_files = ["WidgetSettings.exe", "config/defaults.ini"]
//!
//! [merge]
//! locked_patterns = ["*.ico", "*.png"]
//!
//! [merge.rules]
//! config = "additive-merge"
//! modules = "full-replace"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::core::UpdateError;
use crate::upgrade::config::UpgradeConfig;

/// Name of the subdirectory of the cache that holds backup archives.
pub const BACKUP_DIR_NAME: &str = "backups";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub release: ReleaseSettings,
    pub install: InstallSettings,
    #[serde(default)]
    pub merge: MergeSettings,
    #[serde(default)]
    pub marker: MarkerSettings,
    #[serde(default)]
    pub upgrade: UpgradeConfig,
}

/// Where releases come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSettings {
    /// `owner/name` of the repository publishing releases.
    pub repo: String,

    /// Base URL of the release API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Base URL used to synthesize source-archive links when a release has no asset.
    #[serde(default = "default_web_base")]
    pub web_base: String,

    /// Sent with every request; the API rejects anonymous agents.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Asset name globs, most specific first.
    #[serde(default = "default_asset_patterns")]
    pub asset_patterns: Vec<String>,

    /// Consider pre-releases when looking for the latest release.
    #[serde(default)]
    pub include_prereleases: bool,

    /// HTTP timeout in seconds for API calls and downloads.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// The live installation and how to recognise its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSettings {
    pub install_dir: PathBuf,

    /// Archive cache. Defaults to `<install_dir>/cache`.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// The application's entry file, the primary payload indicator.
    pub entry_file: String,

    /// Product name, used to rank candidate payload directories.
    #[serde(default)]
    pub product_name: String,

    /// Subfolder every payload contains; the last-resort locator strategy searches
    /// for directories holding it.
    #[serde(default = "default_payload_subfolder")]
    pub payload_subfolder: String,

    /// Additional subfolder names that identify a payload root.
    #[serde(default)]
    pub indicator_dirs: Vec<String>,

    /// File inside the installation holding the installed version.
    #[serde(default = "default_version_file")]
    pub version_file: String,

    /// Files (relative to `install_dir`) that must exist for the application to start.
    #[serde(default)]
    pub required_files: Vec<String>,

    /// Top-level names never included in a backup.
    #[serde(default = "default_backup_exclude")]
    pub backup_exclude: Vec<String>,

    #[serde(default)]
    pub launch: LaunchSettings,
}

/// How to start the application again after an update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchSettings {
    /// Program to start. Defaults to `<install_dir>/<entry_file>`.
    #[serde(default)]
    pub program: Option<PathBuf>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Propagate `--portable` to the relaunched process.
    #[serde(default)]
    pub portable: bool,
}

/// Copy policy for each top-level directory of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    FullReplace,
    AdditiveMerge,
    Default,
}

/// `[merge]`: how each top-level directory of a payload is copied in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeSettings {
    /// Globs for user-customised files that an additive merge never overwrites.
    #[serde(default = "default_locked_patterns")]
    pub locked_patterns: Vec<String>,

    /// Rule per top-level name; anything not listed uses `default`.
    #[serde(default = "default_rules")]
    pub rules: BTreeMap<String, RuleKind>,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            locked_patterns: default_locked_patterns(),
            rules: default_rules(),
        }
    }
}

/// Where the version marker lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerSettings {
    /// Marker store file. Defaults to `markers.toml` next to the configuration file.
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Fixed installation key the marker is stored under.
    #[serde(default = "default_key_path")]
    pub key_path: String,

    /// Name of the marker value.
    #[serde(default = "default_marker_key")]
    pub key: String,
}

impl Default for MarkerSettings {
    fn default() -> Self {
        Self {
            store_path: None,
            key_path: default_key_path(),
            key: default_marker_key(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_web_base() -> String {
    "https://github.com".to_string()
}

fn default_user_agent() -> String {
    format!("hotswap-updater/{}", env!("CARGO_PKG_VERSION"))
}

fn default_asset_patterns() -> Vec<String> {
    vec!["*.zip".to_string()]
}

const fn default_timeout_secs() -> u64 {
    60
}

fn default_payload_subfolder() -> String {
    "config".to_string()
}

fn default_version_file() -> String {
    "VERSION".to_string()
}

fn default_backup_exclude() -> Vec<String> {
    vec!["cache".to_string(), "logs".to_string()]
}

fn default_locked_patterns() -> Vec<String> {
    vec!["*.ico".to_string(), "*.png".to_string()]
}

fn default_rules() -> BTreeMap<String, RuleKind> {
    BTreeMap::from([("config".to_string(), RuleKind::AdditiveMerge)])
}

fn default_key_path() -> String {
    "installation".to_string()
}

fn default_marker_key() -> String {
    "DisplayVersion".to_string()
}

impl EngineConfig {
    /// Load from an explicit path, `HOTSWAP_CONFIG`, or the default location.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use hotswap_updater::config::EngineConfig;
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let config = EngineConfig::load(None).await?;
    /// println!("installation: {}", config.install.install_dir.display());
    /// println!("cache:        {}", config.cache_dir().display());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => match std::env::var("HOTSWAP_CONFIG") {
                Ok(path) => PathBuf::from(path),
                Err(_) => Self::default_path()?,
            },
        };
        Self::load_from(&path).await
    }

    /// Load and validate the TOML file at `path`.
    ///
    /// A configuration that names no marker store keeps `markers.toml` next to the
    /// file it was loaded from.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read engine config from {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .map_err(UpdateError::from)
            .with_context(|| format!("Failed to parse engine config from {}", path.display()))?;

        if config.marker.store_path.is_none() {
            config.marker.store_path =
                path.parent().map(|parent| parent.join("markers.toml"));
        }

        config.validate()?;
        Ok(config)
    }

    /// `hotswap/hotswap.toml` in the platform configuration directory.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine configuration directory"))?;
        Ok(dir.join("hotswap").join("hotswap.toml"))
    }

    /// Reject configurations the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| {
            anyhow::Error::from(UpdateError::ConfigError {
                message,
            })
        };

        match self.release.repo.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {}
            _ => {
                return Err(invalid(format!(
                    "release.repo must be 'owner/name', got '{}'",
                    self.release.repo
                )));
            }
        }

        if self.install.entry_file.trim().is_empty() {
            return Err(invalid("install.entry_file must not be empty".to_string()));
        }

        if self.release.asset_patterns.is_empty() {
            return Err(invalid("release.asset_patterns must not be empty".to_string()));
        }

        for pattern in self.release.asset_patterns.iter().chain(&self.merge.locked_patterns) {
            glob::Pattern::new(pattern)
                .map_err(|e| invalid(format!("invalid glob pattern '{pattern}': {e}")))?;
        }

        Ok(())
    }

    /// Archive cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.install
            .cache_dir
            .clone()
            .unwrap_or_else(|| self.install.install_dir.join("cache"))
    }

    /// Directory holding backup archives.
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.cache_dir().join(BACKUP_DIR_NAME)
    }

    /// Top-level names left out of backups, including the cache directory when it is a
    /// direct child of the installation. A cache nested deeper is skipped by path, see
    /// [`crate::upgrade::BackupManager::with_skipped_paths`].
    #[must_use]
    pub fn backup_exclude(&self) -> Vec<String> {
        let mut exclude = self.install.backup_exclude.clone();
        let cache_dir = self.cache_dir();
        if cache_dir.parent() == Some(self.install.install_dir.as_path())
            && let Some(name) = cache_dir.file_name()
        {
            let name = name.to_string_lossy().to_string();
            if !exclude.iter().any(|e| e.eq_ignore_ascii_case(&name)) {
                exclude.push(name);
            }
        }
        exclude
    }

    /// Program started after an update.
    #[must_use]
    pub fn launch_program(&self) -> PathBuf {
        self.install
            .launch
            .program
            .clone()
            .unwrap_or_else(|| self.install.install_dir.join(&self.install.entry_file))
    }

    /// Marker store file.
    #[must_use]
    pub fn marker_store_path(&self) -> PathBuf {
        self.marker.store_path.clone().unwrap_or_else(|| self.cache_dir().join("markers.toml"))
    }

    /// Minimal configuration for a repository and installation; everything else
    /// takes its default.
    #[must_use]
    pub fn new(repo: impl Into<String>, install_dir: impl Into<PathBuf>, entry_file: &str) -> Self {
        Self {
            release: ReleaseSettings {
                repo: repo.into(),
                api_base: default_api_base(),
                web_base: default_web_base(),
                user_agent: default_user_agent(),
                asset_patterns: default_asset_patterns(),
                include_prereleases: false,
                timeout_secs: default_timeout_secs(),
            },
            install: InstallSettings {
                install_dir: install_dir.into(),
                cache_dir: None,
                entry_file: entry_file.to_string(),
                product_name: String::new(),
                payload_subfolder: default_payload_subfolder(),
                indicator_dirs: Vec::new(),
                version_file: default_version_file(),
                required_files: Vec::new(),
                backup_exclude: default_backup_exclude(),
                launch: LaunchSettings::default(),
            },
            merge: MergeSettings::default(),
            marker: MarkerSettings::default(),
            upgrade: UpgradeConfig::default(),
        }
    }
}
