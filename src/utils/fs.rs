//! File system utilities for the installation directory and the archive cache.
//!
//! These helpers are synchronous (`std::fs`) because every caller runs them as one
//! strictly ordered step of an update; nothing here fans out.
//!
//! Lock detection lives here too: [`is_lock_error`] decides whether an I/O error means
//! "another process holds this file", which the merger treats as a per-file skip
//! rather than a failure.

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Windows `ERROR_SHARING_VIOLATION`.
const ERROR_SHARING_VIOLATION: i32 = 32;
/// Windows `ERROR_LOCK_VIOLATION`.
const ERROR_LOCK_VIOLATION: i32 = 33;

/// Ensures a directory exists, creating it and all parents if necessary.
///
/// Fails if the path exists but is not a directory.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    } else if !path.is_dir() {
        return Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display()));
    }
    Ok(())
}

/// Ensures the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    Ok(())
}

/// Recursively copies `src` into `dst`, skipping top-level entries whose name is in
/// `exclude` (compared case-insensitively) and any entry, at any depth, that is one
/// of the `skip` paths.
///
/// `skip` is compared after canonicalization, so it may be given relative or through
/// a symlink. Skipping a directory skips everything below it, which keeps a
/// destination that lives inside `src` from being copied into itself.
///
/// Returns the number of files copied. Symlinks and special files are skipped.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_updater::utils::fs::copy_dir_excluding;
/// use std::path::{Path, PathBuf};
///
/// # fn example() -> anyhow::Result<()> {
/// let copied = copy_dir_excluding(
///     Path::new("/opt/widget"),
///     Path::new("/tmp/widget-copy"),
///     &["logs".to_string()],
///     &[PathBuf::from("/opt/widget/data/cache")],
/// )?;
/// println!("copied {copied} file(s)");
/// # Ok(())
/// # }
/// ```
pub fn copy_dir_excluding(
    src: &Path,
    dst: &Path,
    exclude: &[String],
    skip: &[PathBuf],
) -> Result<usize> {
    ensure_dir(dst)?;
    let root = fs::canonicalize(src).unwrap_or_else(|_| src.to_path_buf());
    let skip: Vec<PathBuf> =
        skip.iter().map(|p| fs::canonicalize(p).unwrap_or_else(|_| p.clone())).collect();
    copy_children(&root, dst, exclude, &skip)
}

fn copy_children(src: &Path, dst: &Path, exclude: &[String], skip: &[PathBuf]) -> Result<usize> {
    ensure_dir(dst)?;
    let mut copied = 0;

    for entry in
        fs::read_dir(src).with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if exclude.iter().any(|e| e.eq_ignore_ascii_case(&name)) || skip.contains(&path) {
            tracing::debug!("Excluding {} from copy", path.display());
            continue;
        }
        copied += copy_entry(&path, &dst.join(entry.file_name()), skip)?;
    }

    Ok(copied)
}

fn copy_entry(src: &Path, dst: &Path, skip: &[PathBuf]) -> Result<usize> {
    let file_type = fs::symlink_metadata(src)
        .with_context(|| format!("Failed to read metadata: {}", src.display()))?
        .file_type();

    if file_type.is_dir() {
        copy_children(src, dst, &[], skip)
    } else if file_type.is_file() {
        fs::copy(src, dst).with_context(|| {
            format!("Failed to copy file from {} to {}", src.display(), dst.display())
        })?;
        Ok(1)
    } else {
        Ok(0)
    }
}

/// Removes a directory tree if it exists. Missing directories are not an error.
pub fn remove_dir_all(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Whether an I/O error means the file is held open by another process.
///
/// Covers `ResourceBusy`, `ExecutableFileBusy` (a running binary on Unix) and the
/// Windows sharing/lock violations, which surface with an `Other`-like kind.
#[must_use]
pub fn is_lock_error(error: &io::Error) -> bool {
    if matches!(error.kind(), io::ErrorKind::ResourceBusy | io::ErrorKind::ExecutableFileBusy) {
        return true;
    }
    cfg!(windows)
        && matches!(error.raw_os_error(), Some(ERROR_SHARING_VIOLATION | ERROR_LOCK_VIOLATION))
}

/// Size of a file in bytes, or 0 if it cannot be read.
#[must_use]
pub fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
