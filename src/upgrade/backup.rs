//! Backups of the live installation.
//!
//! A snapshot copies the installation (minus excluded top-level names, the backup
//! directory and any other skipped path) into a staging directory
//! `{version}_{timestamp}` beside the backup archives, compresses it into
//! `{version}_{timestamp}.zip.part`, checks the archive is non-empty, renames it to
//! `{version}_{timestamp}.zip` and removes the staging copy. If compression fails the
//! partial archive is deleted and the staging copy is kept so an operator can still
//! recover by hand. Only complete archives ever carry a name [`BackupRecord`] parses.
//!
//! No update step that touches the installation runs unless a snapshot returned a
//! [`BackupRecord`].

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, TimeDelta, Timelike};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::core::UpdateError;
use crate::upgrade::archive::compress_dir;
use crate::upgrade::version_check::normalize_tag;
use crate::utils::fs::{copy_dir_excluding, ensure_dir, file_len, remove_dir_all};

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// A compressed snapshot of the installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    /// Version that was installed when the snapshot was taken.
    pub source_version: String,
    pub created_at: NaiveDateTime,
    pub archive_path: PathBuf,
}

impl BackupRecord {
    /// Parse a record from an archive path named `{version}_{timestamp}.zip`.
    #[must_use]
    pub fn from_archive_path(path: &Path) -> Option<Self> {
        if !path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("zip")) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let (version, timestamp) = stem.rsplit_once('_')?;
        if version.is_empty() {
            return None;
        }
        let created_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
        Some(Self {
            source_version: version.to_string(),
            created_at,
            archive_path: path.to_path_buf(),
        })
    }

    fn file_stem_for(version: &str, created_at: NaiveDateTime) -> String {
        format!("{}_{}", version, created_at.format(TIMESTAMP_FORMAT))
    }
}

/// Creates and catalogues backups in one directory.
pub struct BackupManager {
    backup_dir: PathBuf,
    skip: Vec<PathBuf>,
}

impl BackupManager {
    /// Manager for the archives in `backup_dir`.
    ///
    /// The backup directory itself is never part of a snapshot, wherever it lives.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use hotswap_updater::upgrade::BackupManager;
    /// use std::path::Path;
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let manager = BackupManager::new("/opt/widget/cache/backups");
    /// let record = manager.snapshot(Path::new("/opt/widget"), "1.9.0", &["logs".to_string()]).await?;
    /// println!("backup at {}", record.archive_path.display());
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            skip: Vec::new(),
        }
    }

    /// Also leave `paths` out of every snapshot, at whatever depth they sit inside
    /// the installation. Used for an archive cache nested in the install directory.
    #[must_use]
    pub fn with_skipped_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.skip = paths;
        self
    }

    /// Directory holding the backup archives.
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Snapshot `install_dir` as the backup of `version`.
    ///
    /// Every failure is an [`UpdateError::BackupFailed`]; the installation itself is
    /// only ever read.
    pub async fn snapshot(
        &self,
        install_dir: &Path,
        version: &str,
        exclude: &[String],
    ) -> Result<BackupRecord> {
        let failed = |reason: String, staging: Option<&Path>| UpdateError::BackupFailed {
            install_dir: install_dir.display().to_string(),
            reason,
            staging: staging.map(|p| p.display().to_string()),
        };

        ensure_dir(&self.backup_dir).map_err(|e| failed(format!("{e:#}"), None))?;

        let version = normalize_tag(version).to_string();
        let (staging, archive_path, created_at) = self.free_slot(&version);

        info!("Backing up {} (version {})", install_dir.display(), version);

        let copied = {
            let (src, dst, exclude) = (install_dir.to_path_buf(), staging.clone(), exclude.to_vec());
            let mut skip = self.skip.clone();
            skip.push(self.backup_dir.clone());
            tokio::task::spawn_blocking(move || copy_dir_excluding(&src, &dst, &exclude, &skip))
                .await
                .map_err(|e| failed(e.to_string(), None))?
        };
        let copied = match copied {
            Ok(copied) => copied,
            Err(e) => {
                if let Err(cleanup) = remove_dir_all(&staging) {
                    warn!("Failed to remove staging directory {}: {}", staging.display(), cleanup);
                }
                return Err(failed(format!("{e:#}"), None).into());
            }
        };
        debug!("Staged {} file(s) in {}", copied, staging.display());

        let partial = partial_archive_path(&archive_path);
        let compressed = {
            let (src, dst) = (staging.clone(), partial.clone());
            tokio::task::spawn_blocking(move || compress_dir(&src, &dst))
                .await
                .map_err(|e| failed(e.to_string(), Some(&staging)))?
        };
        if let Err(e) = compressed {
            warn!("Backup compression failed, keeping staging copy at {}", staging.display());
            discard_partial(&partial).await;
            return Err(failed(format!("{e:#}"), Some(&staging)).into());
        }

        if file_len(&partial) == 0 {
            discard_partial(&partial).await;
            return Err(failed(
                format!("backup archive {} is missing or empty", archive_path.display()),
                Some(&staging),
            )
            .into());
        }

        if let Err(e) = fs::rename(&partial, &archive_path).await {
            discard_partial(&partial).await;
            return Err(failed(
                format!("Failed to move backup into {}: {e}", archive_path.display()),
                Some(&staging),
            )
            .into());
        }

        fs::remove_dir_all(&staging)
            .await
            .with_context(|| format!("Failed to remove staging directory {}", staging.display()))
            .map_err(|e| failed(format!("{e:#}"), None))?;

        info!("Backup created at {}", archive_path.display());
        Ok(BackupRecord {
            source_version: version,
            created_at,
            archive_path,
        })
    }

    /// Staging dir, archive path and timestamp for a new snapshot. Two snapshots in
    /// the same second get consecutive timestamps.
    fn free_slot(&self, version: &str) -> (PathBuf, PathBuf, NaiveDateTime) {
        let now = Local::now().naive_local();
        let mut created_at = now.with_nanosecond(0).unwrap_or(now);
        loop {
            let stem = BackupRecord::file_stem_for(version, created_at);
            let staging = self.backup_dir.join(&stem);
            let archive = self.backup_dir.join(format!("{stem}.zip"));
            if !staging.exists() && !archive.exists() {
                return (staging, archive, created_at);
            }
            created_at += TimeDelta::seconds(1);
        }
    }

    /// All backups, newest first.
    pub async fn list(&self) -> Result<Vec<BackupRecord>> {
        if !fs::try_exists(&self.backup_dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.backup_dir).await.with_context(|| {
            format!("Failed to read backup directory {}", self.backup_dir.display())
        })?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match BackupRecord::from_archive_path(&entry.path()) {
                Some(record) => records.push(record),
                None => debug!("Ignoring unrecognised file in backups: {}", entry.path().display()),
            }
        }

        records.sort_by(|a, b| {
            b.created_at.cmp(&a.created_at).then_with(|| b.archive_path.cmp(&a.archive_path))
        });
        Ok(records)
    }

    /// Newest backup of any version.
    pub async fn latest(&self) -> Result<Option<BackupRecord>> {
        Ok(self.list().await?.into_iter().next())
    }

    /// Newest backup of `version`. A leading `v` is ignored on both sides.
    pub async fn find(&self, version: &str) -> Result<Option<BackupRecord>> {
        let wanted = normalize_tag(version);
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|record| normalize_tag(&record.source_version) == wanted))
    }

    /// Delete all but the newest `keep` backups. `keep == 0` keeps everything.
    pub async fn prune(&self, keep: usize) -> Result<usize> {
        if keep == 0 {
            return Ok(0);
        }

        let mut removed = 0;
        for record in self.list().await?.into_iter().skip(keep) {
            match fs::remove_file(&record.archive_path).await {
                Ok(()) => {
                    debug!("Pruned backup {}", record.archive_path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to prune {}: {}", record.archive_path.display(), e),
            }
        }
        if removed > 0 {
            info!("Pruned {} old backup(s)", removed);
        }
        Ok(removed)
    }
}

/// `{stem}.zip.part`, the name an archive has while it is being written.
fn partial_archive_path(archive_path: &Path) -> PathBuf {
    let mut name = archive_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    archive_path.with_file_name(name)
}

async fn discard_partial(path: &Path) {
    if path.is_file()
        && let Err(e) = fs::remove_file(path).await
    {
        warn!("Failed to delete partial backup {}: {}", path.display(), e);
    }
}
