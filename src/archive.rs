//! Chapter archive (CBZ) extraction.
//!
//! An archive `Book/Chapter 3.cbz` becomes the chapter unit directory
//! `Book/Chapter 3_unzipped/`:
//!
//! 1. The archive is opened as a ZIP container. Failure → `CorruptArchive`.
//! 2. Entries are written flat (directory structure dropped, basename only)
//!    into a temporary directory next to the destination. Directory entries
//!    and OS metadata files (`.DS_Store`, `Thumbs.db`) are skipped.
//! 3. If no `1.png` (in any letter case) was extracted, the lexicographically first
//!    `png`/`jpg`/`jpeg` file is renamed to `1.png` so the split stage finds
//!    its first page.
//! 4. Any previous destination directory is removed and the temporary
//!    directory is renamed into place, so a crash never leaves a half
//!    extracted unit under the final name. Staging directories orphaned by
//!    a crash are removed by [`sweep_staging_dirs`].
//!
//! ZIP decoding is synchronous; [`extract_archive`] runs it on the blocking
//! pool.

use crate::error::UnitError;
use crate::naming::file_name_lossy;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix appended to an archive's base name to form its unit directory.
pub const UNZIPPED_SUFFIX: &str = "_unzipped";

/// Archive extensions recognised as chapter units (lower-case).
pub const ARCHIVE_EXTENSIONS: &[&str] = &["cbz"];

/// Entry basenames never extracted (compared lower-case).
const SKIPPED_ENTRIES: &[&str] = &[".ds_store", "thumbs.db"];

/// Name prefix of the hidden directory an archive is extracted into first.
const STAGING_PREFIX: &str = ".extract-";

/// Image extensions eligible for first-page normalization (lower-case).
const FIRST_PAGE_CANDIDATES: &[&str] = &["png", "jpg", "jpeg"];

/// True if `path` has a chapter archive extension (case-insensitive).
pub fn is_chapter_archive(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| ARCHIVE_EXTENSIONS.contains(&ext.as_str()))
}

/// The unit directory an archive extracts into: `<parent>/<stem><suffix>`.
pub fn companion_dir(archive: &Path, parent_dir: &Path, suffix: &str) -> PathBuf {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent_dir.join(format!("{stem}{suffix}"))
}

/// Extract `archive` into `<parent_dir>/<stem><suffix>` and return that path.
///
/// An existing destination is replaced.
pub async fn extract_archive(
    archive: &Path,
    parent_dir: &Path,
    suffix: &str,
) -> Result<PathBuf, UnitError> {
    let archive_buf = archive.to_path_buf();
    let dest = companion_dir(archive, parent_dir, suffix);
    let dest_clone = dest.clone();

    tokio::task::spawn_blocking(move || extract_blocking(&archive_buf, &dest_clone))
        .await
        .map_err(|e| UnitError::ExtractionFailed {
            path: archive.to_path_buf(),
            detail: format!("extraction task panicked: {e}"),
        })??;

    info!("Extracted '{}' → '{}'", archive.display(), dest.display());
    Ok(dest)
}

/// Blocking implementation of archive extraction.
fn extract_blocking(archive: &Path, dest: &Path) -> Result<(), UnitError> {
    let failed = |detail: String| UnitError::ExtractionFailed {
        path: archive.to_path_buf(),
        detail,
    };

    let file = File::open(archive).map_err(|e| failed(format!("cannot open: {e}")))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| UnitError::CorruptArchive {
        path: archive.to_path_buf(),
        detail: e.to_string(),
    })?;

    let parent = dest
        .parent()
        .ok_or_else(|| failed(format!("destination '{}' has no parent", dest.display())))?;
    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(parent)
        .map_err(|e| failed(format!("cannot create staging dir in '{}': {e}", parent.display())))?;

    let mut extracted = 0usize;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| UnitError::CorruptArchive {
            path: archive.to_path_buf(),
            detail: format!("entry #{i}: {e}"),
        })?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry_basename(entry.name()) else {
            continue;
        };
        if SKIPPED_ENTRIES.contains(&name.to_lowercase().as_str()) {
            debug!("Skipping metadata entry '{}'", entry.name());
            continue;
        }

        let target = staging.path().join(&name);
        let mut out = File::create(&target)
            .map_err(|e| failed(format!("cannot create '{}': {e}", target.display())))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| failed(format!("cannot extract '{name}': {e}")))?;
        extracted += 1;
    }

    if extracted == 0 {
        warn!("Archive '{}' contains no files", archive.display());
    }

    normalize_first_page(staging.path())
        .map_err(|e| failed(format!("cannot rename first page: {e}")))?;

    if dest.exists() {
        std::fs::remove_dir_all(dest)
            .map_err(|e| failed(format!("cannot remove old '{}': {e}", dest.display())))?;
    }
    std::fs::rename(staging.path(), dest)
        .map_err(|e| failed(format!("cannot move extraction to '{}': {e}", dest.display())))?;

    debug!("Extracted {} file(s) from '{}'", extracted, archive.display());
    Ok(())
}

/// Final path component of a ZIP entry name, accepting `/` and `\` separators.
fn entry_basename(name: &str) -> Option<String> {
    name.rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
        .map(str::to_string)
}

/// Make sure the unit's first page is named `1.png`.
///
/// An existing `1.png` in any letter case is kept (and renamed to the exact
/// lower-case name); otherwise the first image in name order is renamed.
fn normalize_first_page(dir: &Path) -> io::Result<()> {
    let first = dir.join("1.png");
    let files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .collect();

    if let Some(existing) = files
        .iter()
        .find(|p| file_name_lossy(p).eq_ignore_ascii_case("1.png"))
    {
        if *existing != first {
            debug!("Renaming '{}' to 1.png", existing.display());
            std::fs::rename(existing, &first)?;
        }
        return Ok(());
    }

    let mut candidates: Vec<&PathBuf> = files
        .iter()
        .filter(|p| {
            p.extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .is_some_and(|ext| FIRST_PAGE_CANDIDATES.contains(&ext.as_str()))
        })
        .collect();
    candidates.sort();

    if let Some(page) = candidates.first() {
        debug!("Renaming '{}' to 1.png", page.display());
        std::fs::rename(page, &first)?;
    }
    Ok(())
}

/// Remove staging directories left in `book_dir` by an interrupted
/// extraction. Returns one message per directory that could not be removed.
pub async fn sweep_staging_dirs(book_dir: &Path) -> Vec<String> {
    let mut failures = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(book_dir).await else {
        return failures;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
        if !is_dir || !file_name_lossy(&path).starts_with(STAGING_PREFIX) {
            continue;
        }
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => info!("Removed leftover extraction '{}'", path.display()),
            Err(e) => {
                warn!("Could not remove '{}': {}", path.display(), e);
                failures.push(format!("remove '{}': {}", path.display(), e));
            }
        }
    }
    failures
}
