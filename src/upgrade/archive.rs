//! ZIP handling: validating downloads, unpacking releases, packing backups.
//!
//! Entry names are resolved with [`zip::read::ZipFile::enclosed_name`], so an entry
//! that would escape the destination (`../`, absolute paths) is skipped rather than
//! written.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::core::UpdateError;
use crate::utils::fs::{ensure_dir, ensure_parent_dir};

/// Open `path` as a ZIP archive and return its entry count.
///
/// Fails with [`UpdateError::ArchiveInvalid`] when the file is not a readable ZIP.
pub fn validate_archive(path: &Path) -> Result<usize> {
    let invalid = |reason: String| UpdateError::ArchiveInvalid {
        path: path.display().to_string(),
        reason,
    };

    let file = File::open(path).map_err(|e| invalid(e.to_string()))?;
    let archive = ZipArchive::new(file).map_err(|e| invalid(e.to_string()))?;
    Ok(archive.len())
}

/// Unpack `archive_path` into `dest`, returning the number of files written.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<usize> {
    extract_inner(archive_path, dest).map_err(|e| {
        UpdateError::ExtractFailed {
            path: archive_path.display().to_string(),
            reason: format!("{e:#}"),
        }
        .into()
    })
}

fn extract_inner(archive_path: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(file)?;
    ensure_dir(dest)?;

    let mut written = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping unsafe archive entry: {}", entry.name());
            continue;
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            ensure_dir(&target)?;
            continue;
        }

        ensure_parent_dir(&target)?;
        let mut out = BufWriter::new(
            File::create(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?,
        );
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("Failed to unpack {}", entry.name()))?;
        out.flush()?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))?;
        }

        written += 1;
    }

    debug!("Extracted {} file(s) from {} into {}", written, archive_path.display(), dest.display());
    Ok(written)
}

/// Pack the contents of `src_dir` into a new archive at `archive_path`.
///
/// Entries are stored relative to `src_dir` with `/` separators, in file-name order.
/// Returns the number of files packed.
pub fn compress_dir(src_dir: &Path, archive_path: &Path) -> Result<usize> {
    ensure_parent_dir(archive_path)?;
    let file = File::create(archive_path)
        .with_context(|| format!("Failed to create archive {}", archive_path.display()))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut packed = 0;
    for entry in WalkDir::new(src_dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .with_context(|| format!("{} is outside {}", entry.path().display(), src_dir.display()))?;
        let name = relative.to_string_lossy().replace('\\', "/");

        if entry.file_type().is_dir() {
            writer.add_directory(format!("{name}/"), options)?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, options)?;
            let mut source = File::open(entry.path())
                .with_context(|| format!("Failed to read {}", entry.path().display()))?;
            io::copy(&mut source, &mut writer)?;
            packed += 1;
        }
    }

    writer.finish()?.flush()?;
    debug!("Packed {} file(s) from {} into {}", packed, src_dir.display(), archive_path.display());
    Ok(packed)
}
