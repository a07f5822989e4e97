//! Installed-version detection, version comparison and the poll cache.
//!
//! [`VersionProbe`] reads the version of the installed application and keeps the
//! persisted marker in agreement with it. [`DottedVersion`] orders the version
//! strings releases actually use (`1.9.1`, `v2.7.0-0`, four-part `1.2.3.4`), and
//! [`VersionCheckCache`] remembers the last background check so polls honour the
//! configured interval.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::upgrade::marker::ConfigStore;

/// Reported when the installed version cannot be read.
pub const FALLBACK_VERSION: &str = "0.0.0.0";

/// Dotted numeric version with an optional pre-release qualifier.
///
/// Components are compared numerically, missing trailing components count as zero
/// (`1.2 == 1.2.0`), and a qualified version sorts before the plain one
/// (`2.7.0-0 < 2.7.0`), matching semver pre-release precedence.
#[derive(Debug, Clone)]
pub struct DottedVersion {
    parts: Vec<u64>,
    pre: Option<semver::Prerelease>,
}

impl DottedVersion {
    /// Parse a version or tag. A leading `v` and `+build` metadata are ignored.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = normalize_tag(input);
        let without_build = trimmed.split('+').next().unwrap_or_default();

        let (numbers, pre) = match without_build.split_once('-') {
            Some((_, "")) => return None,
            Some((numbers, pre)) => (numbers, Some(semver::Prerelease::new(pre).ok()?)),
            None => (without_build, None),
        };

        if numbers.is_empty() {
            return None;
        }
        let parts = numbers
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            parts,
            pre,
        })
    }

    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }
}

impl Ord for DottedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }

        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for DottedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DottedVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DottedVersion {}

impl fmt::Display for DottedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let numbers: Vec<String> = self.parts.iter().map(u64::to_string).collect();
        write!(f, "{}", numbers.join("."))?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

/// Strip surrounding whitespace and a leading `v`/`V` from a tag.
#[must_use]
pub fn normalize_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix(['v', 'V']).unwrap_or(tag)
}

/// True only when `latest` is strictly newer than `current`.
///
/// Unparseable versions never report an update.
#[must_use]
pub fn is_update_available(current: &str, latest: &str) -> bool {
    match (DottedVersion::parse(current), DottedVersion::parse(latest)) {
        (Some(current), Some(latest)) => latest > current,
        _ => false,
    }
}

/// Running version plus persisted marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationState {
    pub running: String,
    pub marker: Option<String>,
}

impl InstallationState {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.marker.as_deref() == Some(self.running.as_str())
    }
}

/// Reads the installed version and reconciles the marker with it.
#[derive(Debug, Clone)]
pub struct VersionProbe {
    version_path: PathBuf,
}

impl VersionProbe {
    pub fn new(install_dir: &Path, version_file: &str) -> Self {
        Self {
            version_path: install_dir.join(version_file),
        }
    }

    /// Version of the installed application, or [`FALLBACK_VERSION`] when the version
    /// file is missing or unreadable. Never fails.
    #[must_use]
    pub fn current_version(&self) -> String {
        let content = match std::fs::read_to_string(&self.version_path) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    "Cannot read version from {}: {}; assuming {}",
                    self.version_path.display(),
                    e,
                    FALLBACK_VERSION
                );
                return FALLBACK_VERSION.to_string();
            }
        };

        let version = content.lines().next().map(str::trim).unwrap_or_default();
        if DottedVersion::parse(version).is_some() {
            normalize_tag(version).to_string()
        } else {
            warn!(
                "Unrecognised version '{}' in {}; assuming {}",
                version,
                self.version_path.display(),
                FALLBACK_VERSION
            );
            FALLBACK_VERSION.to_string()
        }
    }

    /// Running version and marker value together.
    pub fn state(&self, store: &dyn ConfigStore, key: &str) -> Result<InstallationState> {
        Ok(InstallationState {
            running: self.current_version(),
            marker: store.get(key).context("Failed to read version marker")?,
        })
    }

    /// Rewrite the marker when it disagrees with `current`.
    ///
    /// Returns `true` when the marker was rewritten. Calling it again is a no-op.
    pub fn reconcile(&self, store: &dyn ConfigStore, key: &str, current: &str) -> Result<bool> {
        let marker = store.get(key).context("Failed to read version marker")?;
        if marker.as_deref() == Some(current) {
            debug!("Version marker already at {}", current);
            return Ok(false);
        }

        info!(
            "Version marker {} disagrees with installed {}; rewriting",
            marker.as_deref().unwrap_or("<unset>"),
            current
        );
        store.set(key, current).context("Failed to write version marker")?;
        Ok(true)
    }
}

/// Result of the last background update check, stored as JSON in the cache directory.
#[derive(Debug, Serialize, Deserialize)]
pub struct VersionCheckCache {
    pub latest_version: String,
    pub current_version: String,
    pub checked_at: DateTime<Utc>,
    pub update_available: bool,
}

impl VersionCheckCache {
    pub fn new(current_version: String, latest_version: String) -> Self {
        let update_available = is_update_available(&current_version, &latest_version);
        Self {
            latest_version,
            current_version,
            checked_at: Utc::now(),
            update_available,
        }
    }

    /// Whether the cached result is younger than `interval_seconds`.
    #[must_use]
    pub fn is_valid(&self, interval_seconds: u64) -> bool {
        let age = Utc::now() - self.checked_at;
        age.num_seconds() < interval_seconds as i64
    }

    /// Read a saved check. `None` when nothing was saved yet.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            debug!("No version cache found");
            return Ok(None);
        }

        let content = fs::read_to_string(path).await.context("Failed to read version cache")?;
        let cache = serde_json::from_str(&content).context("Failed to parse version cache")?;
        Ok(Some(cache))
    }

    /// Write the check as JSON, creating the cache directory if needed.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize version cache")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.context("Failed to create cache directory")?;
        }

        fs::write(path, content).await.context("Failed to write version cache")?;
        debug!("Saved version check to cache");
        Ok(())
    }

    pub async fn clear(path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path).await.context("Failed to remove version cache")?;
        }
        Ok(())
    }
}

/// Human-readable summary for `hotswap status`.
pub fn format_version_info(current: &str, latest: Option<&str>) -> String {
    match latest {
        Some(v) if is_update_available(current, v) => {
            format!("Current version: {current}\nLatest version:  {v} (update available)")
        }
        _ => format!("Current version: {current} (up to date)"),
    }
}
