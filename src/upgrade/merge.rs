//! Copies a located payload into the live installation.
//!
//! Each top-level entry of the payload is handled by the [`MergeRule`] configured for
//! its name:
//!
//! - [`MergeRule::FullReplace`] deletes the destination subtree and copies the source
//!   wholesale. Failing to delete is a hard failure for that entry, but the source is
//!   still copied in file by file so a partly deleted directory gets its files back.
//! - [`MergeRule::AdditiveMerge`] copies files one by one into the existing directory.
//!   A file matching a locked pattern that already exists at the destination is kept
//!   as is (user customisations such as icons).
//! - [`MergeRule::Default`] tries to remove the destination directory, then overwrites
//!   file by file.
//!
//! Under every rule a copy the OS refuses because another process holds the file is
//! recorded in [`MergeReport::skipped`] and the merge carries on. Only other errors end
//! up in [`MergeReport::failed`].

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{MergeSettings, RuleKind};
use crate::core::UpdateError;
use crate::utils::fs::{ensure_dir, is_lock_error};

const LOCKED_MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Copy policy resolved for one top-level name.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeRule {
    FullReplace,
    AdditiveMerge {
        locked: Vec<Pattern>,
    },
    Default,
}

/// Rule table keyed by top-level name.
#[derive(Debug, Clone)]
pub struct MergeRules {
    rules: Vec<(String, RuleKind)>,
    locked: Vec<Pattern>,
}

impl MergeRules {
    /// Compile the configured rules and locked patterns.
    ///
    /// # Errors
    ///
    /// [`UpdateError::ConfigError`] for a locked pattern that is not a valid glob.
    pub fn from_settings(settings: &MergeSettings) -> Result<Self> {
        let locked = settings
            .locked_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    anyhow::Error::from(UpdateError::ConfigError {
                        message: format!("invalid locked pattern '{p}': {e}"),
                    })
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules: settings.rules.iter().map(|(name, kind)| (name.clone(), *kind)).collect(),
            locked,
        })
    }

    /// Rule for a top-level name. Names compare case-insensitively; unlisted names
    /// get [`MergeRule::Default`].
    #[must_use]
    pub fn resolve(&self, name: &str) -> MergeRule {
        let kind = self
            .rules
            .iter()
            .find(|(rule_name, _)| rule_name.eq_ignore_ascii_case(name))
            .map_or(RuleKind::Default, |(_, kind)| *kind);

        match kind {
            RuleKind::FullReplace => MergeRule::FullReplace,
            RuleKind::AdditiveMerge => MergeRule::AdditiveMerge {
                locked: self.locked.clone(),
            },
            RuleKind::Default => MergeRule::Default,
        }
    }
}

/// One skipped or failed path and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeEntry {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a merge. Paths are relative to the installation directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub applied: Vec<PathBuf>,
    pub skipped: Vec<MergeEntry>,
    pub failed: Vec<MergeEntry>,
}

impl MergeReport {
    /// No entry failed. Skipped files do not count as failures.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} applied, {} skipped, {} failed",
            self.applied.len(),
            self.skipped.len(),
            self.failed.len()
        )
    }

    fn skip(&mut self, path: &Path, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Skipped {}: {}", path.display(), reason);
        self.skipped.push(MergeEntry {
            path: path.to_path_buf(),
            reason,
        });
    }

    fn fail(&mut self, path: &Path, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Failed {}: {}", path.display(), reason);
        self.failed.push(MergeEntry {
            path: path.to_path_buf(),
            reason,
        });
    }

    /// `path: reason` lines for every failure.
    #[must_use]
    pub fn failure_lines(&self) -> Vec<String> {
        self.failed.iter().map(|f| format!("{}: {}", f.path.display(), f.reason)).collect()
    }
}

/// File operations the merger performs on the live directory.
pub trait FileCopier: Send + Sync {
    fn copy_file(&self, src: &Path, dst: &Path) -> io::Result<()>;
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// [`FileCopier`] backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsCopier;

impl FileCopier for FsCopier {
    fn copy_file(&self, src: &Path, dst: &Path) -> io::Result<()> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst).map(|_| ())
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }
}

/// Applies [`MergeRules`] to copy a payload over the installation.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_updater::config::MergeSettings;
/// use hotswap_updater::upgrade::InstallMerger;
/// use hotswap_updater::upgrade::merge::MergeRules;
/// use std::path::Path;
///
/// # fn example() -> anyhow::Result<()> {
/// let merger = InstallMerger::new(MergeRules::from_settings(&MergeSettings::default())?);
/// let report = merger.apply(Path::new("/tmp/extracted/App"), Path::new("/opt/widget"))?;
/// println!("{}", report.summary());
/// # Ok(())
/// # }
/// ```
pub struct InstallMerger {
    rules: MergeRules,
    copier: Box<dyn FileCopier>,
}

impl InstallMerger {
    /// Merger that works on the real file system.
    pub fn new(rules: MergeRules) -> Self {
        Self::with_copier(rules, Box::new(FsCopier))
    }

    /// Merger that performs every file operation through `copier`.
    pub fn with_copier(rules: MergeRules, copier: Box<dyn FileCopier>) -> Self {
        Self {
            rules,
            copier,
        }
    }

    /// Merge every top-level entry of `payload_root` into `install_dir`.
    ///
    /// Errors only when the payload itself cannot be read; per-file problems land in
    /// the report.
    pub fn apply(&self, payload_root: &Path, install_dir: &Path) -> Result<MergeReport> {
        ensure_dir(install_dir)?;
        let mut report = MergeReport::default();

        let mut entries = fs::read_dir(payload_root)
            .with_context(|| format!("Failed to read payload {}", payload_root.display()))?
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort_by_key(fs::DirEntry::file_name);

        for entry in entries {
            let name = entry.file_name().to_string_lossy().to_string();
            let src = entry.path();
            let dst = install_dir.join(&name);
            let rule = self.rules.resolve(&name);
            debug!("Merging {} with {:?}", name, rule);

            if entry.file_type()?.is_dir() {
                self.merge_dir(&src, &dst, Path::new(&name), &rule, &mut report);
            } else {
                self.copy_one(&src, &dst, Path::new(&name), &rule, &mut report);
            }
        }

        info!("Merge into {} finished: {}", install_dir.display(), report.summary());
        Ok(report)
    }

    fn merge_dir(&self, src: &Path, dst: &Path, relative: &Path, rule: &MergeRule, report: &mut MergeReport) {
        if dst.exists() {
            match rule {
                MergeRule::FullReplace => {
                    // A removal that stops halfway still gets the payload copied back in,
                    // so the directory is never left without its files
                    if let Err(e) = self.copier.remove_dir_all(dst) {
                        report.fail(relative, format!("could not remove existing directory: {e}"));
                    }
                }
                MergeRule::Default => {
                    if let Err(e) = self.copier.remove_dir_all(dst) {
                        debug!(
                            "Could not remove {} ({}), overwriting file by file",
                            dst.display(),
                            e
                        );
                    }
                }
                MergeRule::AdditiveMerge {
                    ..
                } => {}
            }
        }

        if let Err(e) = fs::create_dir_all(dst) {
            report.fail(relative, e.to_string());
            return;
        }

        for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    report.fail(relative, e.to_string());
                    continue;
                }
            };
            let Ok(inner) = entry.path().strip_prefix(src) else {
                continue;
            };
            let target = dst.join(inner);
            let relative = relative.join(inner);

            if entry.file_type().is_dir() {
                if let Err(e) = fs::create_dir_all(&target) {
                    report.fail(&relative, e.to_string());
                }
            } else if entry.file_type().is_file() {
                self.copy_one(entry.path(), &target, &relative, rule, report);
            }
        }
    }

    fn copy_one(&self, src: &Path, dst: &Path, relative: &Path, rule: &MergeRule, report: &mut MergeReport) {
        if let MergeRule::AdditiveMerge {
            locked,
        } = rule
            && dst.exists()
            && is_locked_name(locked, dst)
        {
            report.skip(relative, "matches a locked pattern; existing file kept");
            return;
        }

        match self.copier.copy_file(src, dst) {
            Ok(()) => report.applied.push(relative.to_path_buf()),
            Err(e) if is_lock_error(&e) => report.skip(relative, format!("file in use: {e}")),
            Err(e) => report.fail(relative, e.to_string()),
        }
    }
}

fn is_locked_name(patterns: &[Pattern], path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    patterns.iter().any(|p| p.matches_with(&name, LOCKED_MATCH))
}
