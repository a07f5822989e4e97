//! Startup repair of a damaged installation.
//!
//! When required files are missing (deleted by hand, quarantined by antivirus, a
//! half-finished update), the archive of the version that is *currently installed* is
//! obtained from the cache or the release registry and only the missing files are
//! copied back. Nothing that exists is overwritten. Repair succeeds only when every
//! required file exists afterwards.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::core::UpdateError;
use crate::upgrade::archive::{extract_archive, validate_archive};
use crate::upgrade::cache::{ArchiveCache, ArchiveFetcher, CachedArchive};
use crate::upgrade::locator::{LocateOutcome, PayloadLocator};
use crate::upgrade::release::ReleaseClient;
use crate::upgrade::version_check::VersionProbe;

/// Outcome of a successful [`RepairService::ensure`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Installed version whose archive was used, if one was needed.
    pub version: Option<String>,
    pub restored: Vec<String>,
    pub archive: Option<PathBuf>,
}

impl RepairReport {
    /// Nothing was missing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.restored.is_empty()
    }
}

/// Restores missing required files from the archive of the installed version.
///
/// Borrows the engine's components for the length of one repair.
pub struct RepairService<'a> {
    install_dir: &'a Path,
    repo: &'a str,
    probe: &'a VersionProbe,
    cache: &'a ArchiveCache,
    client: &'a ReleaseClient,
    fetcher: &'a ArchiveFetcher,
    locator: &'a PayloadLocator,
}

impl<'a> RepairService<'a> {
    pub fn new(
        install_dir: &'a Path,
        repo: &'a str,
        probe: &'a VersionProbe,
        cache: &'a ArchiveCache,
        client: &'a ReleaseClient,
        fetcher: &'a ArchiveFetcher,
        locator: &'a PayloadLocator,
    ) -> Self {
        Self {
            install_dir,
            repo,
            probe,
            cache,
            client,
            fetcher,
            locator,
        }
    }

    /// Required files (relative to the installation) that do not exist.
    #[must_use]
    pub fn missing_files(&self, required: &[String]) -> Vec<String> {
        required.iter().filter(|rel| !self.install_dir.join(rel).exists()).cloned().collect()
    }

    /// Make sure every file in `required` exists, restoring missing ones from the
    /// installed version's archive.
    pub async fn ensure(&self, required: &[String]) -> Result<RepairReport> {
        let missing = self.missing_files(required);
        if missing.is_empty() {
            debug!("All {} required file(s) present", required.len());
            return Ok(RepairReport::default());
        }

        let version = self.probe.current_version();
        warn!("{} required file(s) missing, repairing from version {}", missing.len(), version);

        let archive = self
            .archive_for(&version)
            .await
            .with_context(|| format!("Failed to obtain the archive of installed version {version}"))?;

        let extraction = tempfile::TempDir::new().context("Failed to create extraction directory")?;
        extract_archive(&archive.path, extraction.path())?;

        let payload = match self.locator.locate(extraction.path())? {
            LocateOutcome::Located {
                root,
                ..
            } => root,
            LocateOutcome::NotFound => {
                return Err(UpdateError::PayloadNotFound {
                    root: archive.path.display().to_string(),
                }
                .into());
            }
        };

        let mut restored = Vec::new();
        for rel in &missing {
            let src = payload.join(rel);
            let dst = self.install_dir.join(rel);
            if !src.is_file() {
                warn!("{} is not part of the {} archive", rel, version);
                continue;
            }
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            match fs::copy(&src, &dst) {
                Ok(_) => {
                    info!("Restored {}", rel);
                    restored.push(rel.clone());
                }
                Err(e) => warn!("Failed to restore {}: {}", rel, e),
            }
        }

        let still_missing = self.missing_files(required);
        if !still_missing.is_empty() {
            return Err(UpdateError::RepairIncomplete {
                missing: still_missing,
            }
            .into());
        }

        Ok(RepairReport {
            version: Some(version),
            restored,
            archive: Some(archive.path),
        })
    }

    /// Cache first; otherwise ask the registry for the release and download it.
    async fn archive_for(&self, version: &str) -> Result<CachedArchive> {
        if let Some(mut cached) = self.cache.lookup(version)? {
            match validate_archive(&cached.path) {
                Ok(_) => {
                    cached.validated = true;
                    return Ok(cached);
                }
                Err(e) => warn!("Ignoring unusable cached archive: {:#}", e),
            }
        }

        let release = self.client.fetch_for_version(self.repo, version).await?;
        self.cache.resolve(&release, self.fetcher).await
    }
}
