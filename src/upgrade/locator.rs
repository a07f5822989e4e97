//! Finds the application payload inside an extracted release.
//!
//! Release archives come in several layouts: the payload at the archive root, wrapped
//! in one directory (`Widget-1.9.1/`, GitHub's `repo-tag/` source archives), or buried
//! deeper next to build scripts. Three strategies are tried in order:
//!
//! 1. the extraction root itself holds an indicator (the entry file or a known subfolder)
//! 2. a direct subdirectory holds one; candidates named after the product win, then
//!    names containing `Sources`, then the first in name order
//! 3. a recursive scan for the shallowest directory holding the payload subfolder
//!
//! Directory listings are sorted by name at every level, so the result for a given
//! tree never depends on file system enumeration order.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::InstallSettings;

/// What identifies a payload root.
#[derive(Debug, Clone)]
pub struct PayloadIndicators {
    pub entry_file: String,
    /// Subfolder names any of which marks a payload root.
    pub subfolders: Vec<String>,
    pub product_name: String,
    /// Subfolder searched for by the recursive strategy.
    pub payload_subfolder: String,
}

impl PayloadIndicators {
    /// Indicators for the configured installation. The payload subfolder always
    /// counts as an indicator directory.
    #[must_use]
    pub fn from_settings(install: &InstallSettings) -> Self {
        let mut subfolders = install.indicator_dirs.clone();
        if !subfolders.iter().any(|s| s.eq_ignore_ascii_case(&install.payload_subfolder)) {
            subfolders.push(install.payload_subfolder.clone());
        }
        Self {
            entry_file: install.entry_file.clone(),
            subfolders,
            product_name: install.product_name.clone(),
            payload_subfolder: install.payload_subfolder.clone(),
        }
    }
}

/// Which strategy found the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateStrategy {
    Root,
    Subdirectory,
    RecursiveScan,
}

/// Result of a search. Not finding a payload is an ordinary outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateOutcome {
    Located {
        root: PathBuf,
        strategy: LocateStrategy,
    },
    NotFound,
}

impl LocateOutcome {
    /// Payload root, if one was found.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        match self {
            Self::Located {
                root,
                ..
            } => Some(root),
            Self::NotFound => None,
        }
    }
}

/// Finds the payload root inside an extracted archive.
///
/// Strategies run in order and the first hit wins: the extracted root itself, then
/// its ranked subdirectories, then a recursive scan for the payload subfolder. The
/// same tree always gives the same answer.
pub struct PayloadLocator {
    indicators: PayloadIndicators,
}

impl PayloadLocator {
    pub fn new(indicators: PayloadIndicators) -> Self {
        Self {
            indicators,
        }
    }

    /// Search `extracted_root`.
    ///
    /// # Errors
    ///
    /// Only for I/O failures while reading the tree; a tree without a payload is
    /// [`LocateOutcome::NotFound`].
    pub fn locate(&self, extracted_root: &Path) -> Result<LocateOutcome> {
        if self.has_indicator(extracted_root)? {
            return Ok(self.found(extracted_root.to_path_buf(), LocateStrategy::Root));
        }

        if let Some(dir) = self.best_subdirectory(extracted_root)? {
            return Ok(self.found(dir, LocateStrategy::Subdirectory));
        }

        if let Some(dir) = self.scan_for_payload_subfolder(extracted_root) {
            return Ok(self.found(dir, LocateStrategy::RecursiveScan));
        }

        debug!("No payload found under {}", extracted_root.display());
        Ok(LocateOutcome::NotFound)
    }

    fn found(&self, root: PathBuf, strategy: LocateStrategy) -> LocateOutcome {
        debug!("Payload located at {} ({:?})", root.display(), strategy);
        LocateOutcome::Located {
            root,
            strategy,
        }
    }

    fn has_indicator(&self, dir: &Path) -> Result<bool> {
        for entry in sorted_entries(dir)? {
            let name = entry.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            if entry.is_file() && name.eq_ignore_ascii_case(&self.indicators.entry_file) {
                return Ok(true);
            }
            if entry.is_dir() && self.indicators.subfolders.iter().any(|s| s.eq_ignore_ascii_case(&name)) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn best_subdirectory(&self, root: &Path) -> Result<Option<PathBuf>> {
        let mut candidates = Vec::new();
        for dir in sorted_entries(root)?.into_iter().filter(|p| p.is_dir()) {
            if self.has_indicator(&dir)? {
                candidates.push(dir);
            }
        }

        let product = self.indicators.product_name.to_lowercase();
        let rank = |dir: &PathBuf| {
            let name = dir.file_name().map(|n| n.to_string_lossy().to_lowercase()).unwrap_or_default();
            if !product.is_empty() && name.contains(&product) {
                0
            } else if name.contains("sources") {
                1
            } else {
                2
            }
        };

        Ok(candidates.into_iter().min_by_key(rank))
    }

    fn scan_for_payload_subfolder(&self, root: &Path) -> Option<PathBuf> {
        let wanted = &self.indicators.payload_subfolder;
        if wanted.is_empty() {
            return None;
        }

        WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_type().is_dir()
                    && entry.file_name().to_string_lossy().eq_ignore_ascii_case(wanted)
            })
            .min_by_key(|entry| entry.depth())
            .and_then(|entry| entry.path().parent().map(Path::to_path_buf))
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}
