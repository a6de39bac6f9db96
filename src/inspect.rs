//! Unit state inspection: which pipeline output already exists on disk.
//!
//! The filesystem is the source of truth for per-unit progress. Outputs are
//! checked from the most advanced to the least advanced:
//!
//! | Check                                                   | Result           |
//! |---------------------------------------------------------|------------------|
//! | a `.txt` in the book's final dir matches the unit's key | `FinalPresent`   |
//! | cleaned folder holds a `.txt` file                      | `CleanedPresent` |
//! | OCR folder holds a `.txt` file                          | `RawOcrPresent`  |
//! | otherwise                                               | `NotStarted`     |
//!
//! The final-text match is deliberately fuzzy: both the unit name and the
//! candidate file stem are reduced to a search key and a substring test is
//! used, so `Chapter_0007_TheDuel.txt` satisfies the unit `Chapter 7`.

use crate::archive::UNZIPPED_SUFFIX;
use crate::config::FolderNames;
use crate::error::UnitError;
use crate::naming::{file_name_lossy, sort_paths_natural};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Most advanced output found for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStage {
    FinalPresent,
    CleanedPresent,
    RawOcrPresent,
    NotStarted,
}

impl UnitStage {
    /// True when no stage needs to run for the unit.
    pub fn is_done(self) -> bool {
        matches!(self, UnitStage::FinalPresent | UnitStage::CleanedPresent)
    }
}

impl fmt::Display for UnitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnitStage::FinalPresent => "final text present",
            UnitStage::CleanedPresent => "cleaned",
            UnitStage::RawOcrPresent => "raw OCR",
            UnitStage::NotStarted => "not started",
        })
    }
}

/// Reduce a unit or file name to its fuzzy search key.
///
/// Removes the archive suffix, lower-cases, removes the word `chapter`,
/// trims, maps spaces and hyphens to `_` and drops everything outside
/// `[a-z0-9_]`.
pub fn search_key(name: &str) -> String {
    name.replace(UNZIPPED_SUFFIX, "")
        .to_lowercase()
        .replace("chapter", "")
        .trim()
        .replace([' ', '-'], "_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

/// Determine how far `unit` has progressed.
///
/// `final_dir` is the book's final-texts directory; it may not exist yet.
pub fn inspect(unit: &Path, final_dir: &Path, folders: &FolderNames) -> UnitStage {
    if final_text_present(&file_name_lossy(unit), final_dir) {
        UnitStage::FinalPresent
    } else if dir_has_text(&unit.join(&folders.cleaned)) {
        UnitStage::CleanedPresent
    } else if dir_has_text(&unit.join(&folders.ocr)) {
        UnitStage::RawOcrPresent
    } else {
        UnitStage::NotStarted
    }
}

/// [`inspect`] on the blocking thread pool, for callers on the async executor.
pub async fn inspect_unit(
    unit: &Path,
    final_dir: &Path,
    folders: &FolderNames,
) -> Result<UnitStage, UnitError> {
    let unit_buf = unit.to_path_buf();
    let final_buf = final_dir.to_path_buf();
    let folders = folders.clone();
    tokio::task::spawn_blocking(move || inspect(&unit_buf, &final_buf, &folders))
        .await
        .map_err(|e| UnitError::Io {
            path: unit.to_path_buf(),
            detail: format!("inspection task failed: {e}"),
        })
}

/// `.txt` files of `dir` in natural order, listed on the blocking pool.
pub(crate) async fn list_text_files(dir: &Path) -> Result<Vec<PathBuf>, UnitError> {
    let dir_buf = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut texts: Vec<PathBuf> = text_files(&dir_buf).collect();
        sort_paths_natural(&mut texts);
        texts
    })
    .await
    .map_err(|e| UnitError::Io {
        path: dir.to_path_buf(),
        detail: format!("listing task failed: {e}"),
    })
}

/// True if a `.txt` file in `final_dir` matches `unit_name`'s search key.
/// An empty key never matches.
pub fn final_text_present(unit_name: &str, final_dir: &Path) -> bool {
    let key = search_key(unit_name);
    if key.is_empty() {
        return false;
    }
    text_files(final_dir).any(|file| {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        search_key(&stem).contains(&key)
    })
}

/// True if `dir` exists and holds at least one `.txt` file.
pub fn dir_has_text(dir: &Path) -> bool {
    text_files(dir).next().is_some()
}

/// `.txt` files directly inside `dir`; empty when `dir` is unreadable.
pub(crate) fn text_files(dir: &Path) -> impl Iterator<Item = PathBuf> {
    std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn search_key_normalization() {
        assert_eq!(search_key("Chapter 7"), "7");
        assert_eq!(search_key("Chapter 12 - Night-Fall_unzipped"), "12___night_fall");
        assert_eq!(search_key("Chapter_0007_TheDuel"), "_0007_theduel");
        assert_eq!(search_key("Chapter"), "");
    }

    #[test]
    fn fuzzy_final_match() {
        let book = tempfile::tempdir().unwrap();
        let final_dir = book.path().join("final_texts");
        fs::create_dir_all(&final_dir).unwrap();
        fs::write(final_dir.join("Chapter_0007_TheDuel.txt"), "text").unwrap();

        let unit = book.path().join("Chapter 7");
        fs::create_dir_all(&unit).unwrap();

        let folders = FolderNames::default();
        assert_eq!(inspect(&unit, &final_dir, &folders), UnitStage::FinalPresent);
    }

    #[test]
    fn empty_key_never_matches() {
        let book = tempfile::tempdir().unwrap();
        fs::write(book.path().join("anything.txt"), "").unwrap();
        assert!(!final_text_present("Chapter", book.path()));
    }

    #[test]
    fn cleaned_beats_raw_ocr() {
        let book = tempfile::tempdir().unwrap();
        let unit = book.path().join("Chapter 1");
        let folders = FolderNames::default();
        let final_dir = book.path().join(&folders.final_texts);

        fs::create_dir_all(unit.join(&folders.ocr)).unwrap();
        assert_eq!(inspect(&unit, &final_dir, &folders), UnitStage::NotStarted);

        fs::write(unit.join(&folders.ocr).join("Chapter_0001.txt"), "raw").unwrap();
        assert_eq!(inspect(&unit, &final_dir, &folders), UnitStage::RawOcrPresent);

        fs::create_dir_all(unit.join(&folders.cleaned)).unwrap();
        fs::write(unit.join(&folders.cleaned).join("Chapter_0001.txt"), "clean").unwrap();
        assert_eq!(inspect(&unit, &final_dir, &folders), UnitStage::CleanedPresent);
    }

    #[tokio::test]
    async fn async_inspection_matches_blocking_one() {
        let book = tempfile::tempdir().unwrap();
        let unit = book.path().join("Chapter 3");
        let folders = FolderNames::default();
        let final_dir = book.path().join(&folders.final_texts);
        let cleaned = unit.join(&folders.cleaned);
        fs::create_dir_all(&cleaned).unwrap();
        fs::write(cleaned.join("Chapter_0003.txt"), "clean").unwrap();
        fs::write(cleaned.join("ocr_errors.log"), "").unwrap();

        let stage = inspect_unit(&unit, &final_dir, &folders).await.unwrap();
        assert_eq!(stage, inspect(&unit, &final_dir, &folders));
        assert_eq!(stage, UnitStage::CleanedPresent);

        let texts = list_text_files(&cleaned).await.unwrap();
        assert_eq!(texts, vec![cleaned.join("Chapter_0003.txt")]);
        assert!(list_text_files(&book.path().join("missing")).await.unwrap().is_empty());
    }

    #[test]
    fn non_text_files_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ocr_errors.log"), "x").unwrap();
        assert!(!dir_has_text(dir.path()));
        assert!(!dir_has_text(&dir.path().join("missing")));
    }
}
