//! Local cache of release archives.
//!
//! One flat directory holds every downloaded archive under its asset name; the
//! `backups/` subdirectory next to them belongs to [`super::backup::BackupManager`].
//! A cached archive is never downloaded again. A download that does not open as a
//! ZIP is deleted before the error is returned, so the cache never holds a corrupt
//! file under a valid name.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::ReleaseSettings;
use crate::core::UpdateError;
use crate::upgrade::archive::validate_archive;
use crate::upgrade::release::{ReleaseInfo, build_http_client};
use crate::upgrade::version_check::normalize_tag;
use crate::utils::fs::ensure_dir;
use crate::utils::progress::ProgressBar;

/// An archive present in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArchive {
    pub version: String,
    pub path: PathBuf,
    /// Whether the file has been opened as a ZIP since it was found.
    pub validated: bool,
}

/// Maps versions to archives in the cache directory.
#[derive(Debug, Clone)]
pub struct ArchiveCache {
    dir: PathBuf,
}

impl ArchiveCache {
    /// Cache rooted at `dir`. The directory is created on the first download, so it
    /// need not exist yet.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use hotswap_updater::upgrade::ArchiveCache;
    ///
    /// # fn example() -> anyhow::Result<()> {
    /// let cache = ArchiveCache::new("/opt/widget/cache");
    /// if let Some(hit) = cache.lookup("v1.9.1")? {
    ///     println!("cached: {}", hit.path.display());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
        }
    }

    /// Directory holding the archives.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// First `.zip` (in file-name order) whose name contains the tag, or the tag
    /// without its leading `v`, as a whole version.
    ///
    /// The match must not continue into a longer version on either side: `1.9.1`
    /// finds `App-1.9.1.zip` and `App-1.9.1-win64.zip` but not `App-1.9.10.zip` or
    /// `App-11.9.1.zip`.
    pub fn lookup(&self, version_or_tag: &str) -> Result<Option<CachedArchive>> {
        if !self.dir.is_dir() {
            return Ok(None);
        }

        let mut names: Vec<String> = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read cache directory {}", self.dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| name.to_ascii_lowercase().ends_with(".zip"))
            .collect();
        names.sort();

        let bare = normalize_tag(version_or_tag);
        let mut needles = vec![version_or_tag];
        if bare != version_or_tag {
            needles.push(bare);
        }

        for needle in needles {
            if needle.is_empty() {
                continue;
            }
            if let Some(name) = names.iter().find(|name| contains_version(name, needle)) {
                debug!("Cache hit for {}: {}", version_or_tag, name);
                return Ok(Some(CachedArchive {
                    version: bare.to_string(),
                    path: self.dir.join(name),
                    validated: false,
                }));
            }
        }

        debug!("No cached archive for {}", version_or_tag);
        Ok(None)
    }

    /// Archive for `release`: the cached copy when one validates, otherwise a fresh
    /// download into the asset's cache slot.
    ///
    /// A cached file that no longer opens as a ZIP is deleted and downloaded again.
    pub async fn resolve(&self, release: &ReleaseInfo, fetcher: &ArchiveFetcher) -> Result<CachedArchive> {
        if let Some(mut cached) = self.lookup(&release.tag)? {
            match validate_archive(&cached.path) {
                Ok(_) => {
                    info!("Using cached archive {}", cached.path.display());
                    cached.validated = true;
                    return Ok(cached);
                }
                Err(e) => {
                    warn!("Cached archive is unusable ({:#}), downloading again", e);
                    discard(&cached.path).await;
                }
            }
        }

        let dest = self.path_for(&release.asset_name);
        fetcher.fetch(&release.download_url, &dest).await?;
        Ok(CachedArchive {
            version: release.version().to_string(),
            path: dest,
            validated: true,
        })
    }

    /// Cache slot for an asset.
    #[must_use]
    pub fn path_for(&self, asset_name: &str) -> PathBuf {
        if asset_name.to_ascii_lowercase().ends_with(".zip") {
            self.dir.join(asset_name)
        } else {
            self.dir.join(format!("{asset_name}.zip"))
        }
    }
}

/// Downloads archives into the cache and validates them.
pub struct ArchiveFetcher {
    client: reqwest::Client,
}

impl ArchiveFetcher {
    /// Fetcher sharing the registry's user agent and timeout.
    pub fn new(settings: &ReleaseSettings) -> Result<Self> {
        Ok(Self {
            client: build_http_client(settings)?,
        })
    }

    /// Download `url` to `dest` and check that it opens as a ZIP.
    ///
    /// Returns the number of bytes written. Whatever fails, `dest` does not exist
    /// afterwards unless it holds a valid archive.
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            ensure_dir(parent)?;
        }

        let partial = partial_path(dest);
        let bytes = match self.download(url, &partial).await {
            Ok(bytes) => bytes,
            Err(e) => {
                discard(&partial).await;
                return Err(e);
            }
        };

        tokio::fs::rename(&partial, dest)
            .await
            .with_context(|| format!("Failed to move download into {}", dest.display()))?;

        if let Err(e) = validate_archive(dest) {
            warn!("Downloaded file {} is not a valid archive, deleting it", dest.display());
            discard(dest).await;
            return Err(e);
        }

        info!("Downloaded {} ({} bytes)", dest.display(), bytes);
        Ok(bytes)
    }

    async fn download(&self, url: &str, target: &Path) -> Result<u64> {
        let network_error = |reason: String| UpdateError::NetworkError {
            operation: format!("download {url}"),
            reason,
        };

        debug!("Downloading {} to {}", url, target.display());
        let mut response =
            self.client.get(url).send().await.map_err(|e| network_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(network_error(format!("HTTP {status}")).into());
        }

        let progress = ProgressBar::new_download(response.content_length().unwrap_or(0));
        progress.set_prefix("Downloading");
        if let Some(name) = target.file_name() {
            progress.set_message(name.to_string_lossy().trim_end_matches(".part").to_string());
        }

        let mut file = tokio::fs::File::create(target)
            .await
            .with_context(|| format!("Failed to create {}", target.display()))?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| network_error(e.to_string()))? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress.inc(chunk.len() as u64);
        }
        file.flush().await?;
        progress.finish_and_clear();

        Ok(written)
    }
}

/// Whether `needle` occurs in the archive name `name` with a version boundary on both
/// sides. A boundary is the start or end of the stem, or any character other than a
/// digit or a `.` that joins digits.
fn contains_version(name: &str, needle: &str) -> bool {
    let stem = name.get(..name.len().saturating_sub(".zip".len())).unwrap_or(name);
    let bytes = stem.as_bytes();

    stem.match_indices(needle).any(|(start, matched)| {
        let end = start + matched.len();
        let before_ok = match start.checked_sub(1).map(|i| bytes[i]) {
            None => true,
            Some(b) if b.is_ascii_digit() => false,
            Some(b'.') => !start.checked_sub(2).is_some_and(|i| bytes[i].is_ascii_digit()),
            Some(_) => true,
        };
        let after_ok = match bytes.get(end) {
            None => true,
            Some(b) if b.is_ascii_digit() => false,
            Some(b'.') => !bytes.get(end + 1).is_some_and(u8::is_ascii_digit),
            Some(_) => true,
        };
        before_ok && after_ok
    })
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

async fn discard(path: &Path) {
    if tokio::fs::try_exists(path).await.unwrap_or(false)
        && let Err(e) = tokio::fs::remove_file(path).await
    {
        warn!("Failed to delete {}: {}", path.display(), e);
    }
}
