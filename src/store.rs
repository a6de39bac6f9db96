//! Durable per-book progress.
//!
//! ## File format
//!
//! ```json
//! {
//!   "One Piece": "/data/books/One Piece/Chapter 12",
//!   "Berserk": true
//! }
//! ```
//!
//! A string is the book's cursor: that unit and every unit before it in
//! natural order are finished. `true` marks a book whose final collection has
//! run. Values of any other shape are ignored with a warning.
//!
//! ## Cursor semantics
//!
//! Units finish out of order under concurrency. For every registered book the
//! store keeps the sorted unit list and the set of finished units, and the
//! persisted cursor is the *contiguous frontier*: the furthest unit such that
//! it and all earlier units are finished. A unit finishing ahead of an
//! unfinished predecessor never moves the cursor past that predecessor.
//!
//! ## Durability
//!
//! Every mutation is followed by a save under the same mutex. A save writes
//! `<file>.tmp`, flushes it to disk and renames it over the progress file, so
//! the file is always either the previous or the new snapshot. A leftover
//! `.tmp` from a crash is deleted at load.

use crate::error::{ScanbookError, UnitError};
use serde::ser::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Persisted progress of one book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookProgress {
    /// Last unit of the finished prefix.
    Cursor(PathBuf),
    /// Final collection has run.
    Complete,
}

impl Serialize for BookProgress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BookProgress::Cursor(path) => serializer.serialize_str(&path.to_string_lossy()),
            BookProgress::Complete => serializer.serialize_bool(true),
        }
    }
}

/// Where processing of a book resumes, given its current units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume<'a> {
    /// No cursor: every unit is pending.
    FromStart,
    /// Cursor found: only the units strictly after it are pending.
    After(&'a [PathBuf]),
    /// The cursor names none of the current units.
    StaleCursor,
}

/// Split `units` (sorted) at `cursor`.
pub fn resume_point<'a>(units: &'a [PathBuf], cursor: Option<&Path>) -> Resume<'a> {
    match cursor {
        None => Resume::FromStart,
        Some(cursor) => match units.iter().position(|u| u == cursor) {
            Some(idx) => Resume::After(&units[idx + 1..]),
            None => Resume::StaleCursor,
        },
    }
}

#[derive(Debug, Default)]
struct BookLedger {
    order: Vec<PathBuf>,
    done: HashSet<PathBuf>,
}

impl BookLedger {
    /// Last unit of the finished prefix, if the first unit is finished.
    fn frontier(&self) -> Option<&PathBuf> {
        self.order
            .iter()
            .take_while(|u| self.done.contains(*u))
            .last()
    }
}

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<String, BookProgress>,
    ledgers: HashMap<String, BookLedger>,
}

/// Mutex-guarded progress record backed by a JSON file.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    state: Mutex<State>,
}

impl ProgressStore {
    /// Load the progress file at `path`.
    ///
    /// A missing file yields an empty store. Malformed JSON is logged and
    /// also yields an empty store. Any other read failure is fatal.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, ScanbookError> {
        let path = path.into();

        let tmp = tmp_path(&path);
        match tokio::fs::remove_file(&tmp).await {
            Ok(()) => info!("Removed leftover temporary progress file '{}'", tmp.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove '{}': {}", tmp.display(), e),
        }

        let records = read_progress(&path).await?;
        Ok(Self {
            path,
            state: Mutex::new(State {
                records,
                ledgers: HashMap::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of every persisted record.
    pub async fn snapshot(&self) -> BTreeMap<String, BookProgress> {
        self.state.lock().await.records.clone()
    }

    pub async fn get(&self, book: &str) -> Option<BookProgress> {
        self.state.lock().await.records.get(book).cloned()
    }

    pub async fn is_complete(&self, book: &str) -> bool {
        matches!(self.get(book).await, Some(BookProgress::Complete))
    }

    /// Tell the store the sorted units of `book` for frontier tracking.
    ///
    /// Units up to and including a matching stored cursor count as finished.
    pub async fn register_book(&self, book: &str, units: &[PathBuf]) {
        let mut state = self.state.lock().await;
        let mut ledger = BookLedger {
            order: units.to_vec(),
            done: HashSet::new(),
        };
        if let Some(BookProgress::Cursor(cursor)) = state.records.get(book) {
            if let Resume::After(rest) = resume_point(units, Some(cursor.as_path())) {
                let finished = units.len() - rest.len();
                ledger.done.extend(units[..finished].iter().cloned());
            }
        }
        state.ledgers.insert(book.to_string(), ledger);
    }

    /// Record `unit` of `book` as finished and persist.
    ///
    /// The in-memory record is updated even when the save fails.
    pub async fn mark_unit_done(&self, book: &str, unit: &Path) -> Result<(), UnitError> {
        let mut state = self.state.lock().await;
        if matches!(state.records.get(book), Some(BookProgress::Complete)) {
            debug!("Book '{}' already complete; cursor unchanged", book);
            return Ok(());
        }

        let cursor = match state.ledgers.get_mut(book) {
            Some(ledger) => {
                ledger.done.insert(unit.to_path_buf());
                ledger.frontier().cloned()
            }
            None => Some(unit.to_path_buf()),
        };

        let Some(cursor) = cursor else {
            debug!(
                "'{}' finished ahead of an earlier unit; cursor for '{}' unchanged",
                unit.display(),
                book
            );
            return Ok(());
        };

        if state.records.get(book) == Some(&BookProgress::Cursor(cursor.clone())) {
            return Ok(());
        }
        debug!("Cursor for '{}' → '{}'", book, cursor.display());
        state
            .records
            .insert(book.to_string(), BookProgress::Cursor(cursor));
        self.save_locked(&state.records).await
    }

    /// Record `book` as fully complete and persist.
    pub async fn mark_book_complete(&self, book: &str) -> Result<(), UnitError> {
        let mut state = self.state.lock().await;
        state
            .records
            .insert(book.to_string(), BookProgress::Complete);
        self.save_locked(&state.records).await
    }

    /// Write `records` atomically. Caller holds the state lock.
    async fn save_locked(&self, records: &BTreeMap<String, BookProgress>) -> Result<(), UnitError> {
        write_json_atomic(&self.path, records).await.map_err(|e| {
            error!(
                "CRITICAL: failed to save progress file '{}': {}",
                self.path.display(),
                e
            );
            UnitError::ProgressPersistence {
                path: self.path.clone(),
                detail: e.to_string(),
            }
        })
    }
}

/// Read the progress file without modifying anything on disk.
///
/// A missing file or malformed JSON yields an empty map.
pub async fn read_progress(path: &Path) -> Result<BTreeMap<String, BookProgress>, ScanbookError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(parse_records(path, &bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No progress file at '{}'; starting fresh", path.display());
            Ok(BTreeMap::new())
        }
        Err(source) => Err(ScanbookError::ProgressUnreadable {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse_records(path: &Path, bytes: &[u8]) -> BTreeMap<String, BookProgress> {
    let value: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(e) => {
            warn!(
                "Progress file '{}' is not valid JSON ({}); starting with empty progress",
                path.display(),
                e
            );
            return BTreeMap::new();
        }
    };
    let serde_json::Value::Object(map) = value else {
        warn!(
            "Progress file '{}' is not a JSON object; starting with empty progress",
            path.display()
        );
        return BTreeMap::new();
    };

    let mut records = BTreeMap::new();
    for (book, entry) in map {
        match entry {
            serde_json::Value::String(cursor) => {
                records.insert(book, BookProgress::Cursor(PathBuf::from(cursor)));
            }
            serde_json::Value::Bool(true) => {
                records.insert(book, BookProgress::Complete);
            }
            other => warn!("Ignoring progress entry for '{}': unexpected value {}", book, other),
        }
    }
    records
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let data = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    let tmp = tmp_path(path);
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(&data).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await
}
