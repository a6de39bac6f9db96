//! Offline maintenance: purge intermediates and report library status.
//!
//! Neither operation runs a stage. [`purge_intermediates`] deletes the
//! per-unit and per-book working folders (never the final texts), sweeps
//! leftover extraction staging directories and can optionally delete
//! extracted archive units. [`inspect_library`] only reads:
//! it reports every book's progress record and every unit's stage.

use crate::archive::{sweep_staging_dirs, UNZIPPED_SUFFIX};
use crate::config::{FolderNames, PipelineConfig};
use crate::error::ScanbookError;
use crate::inspect::{inspect_unit, UnitStage};
use crate::naming::file_name_lossy;
use crate::orchestrator::{list_books, scan_book};
use crate::store::{read_progress, BookProgress};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Delete the split, OCR and cleaned folders of `unit`, and the unit itself
/// when `remove_unit` is set. Returns one message per failed deletion.
pub async fn purge_unit_intermediates(
    unit: &Path,
    folders: &FolderNames,
    remove_unit: bool,
) -> Vec<String> {
    let targets = if remove_unit {
        vec![unit.to_path_buf()]
    } else {
        vec![
            unit.join(&folders.split),
            unit.join(&folders.ocr),
            unit.join(&folders.cleaned),
        ]
    };

    let mut failures = Vec::new();
    for target in targets {
        match tokio::fs::remove_dir_all(&target).await {
            Ok(()) => debug!("Removed '{}'", target.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Could not remove '{}': {}", target.display(), e);
                failures.push(format!("remove '{}': {}", target.display(), e));
            }
        }
    }
    failures
}

/// Outcome of [`purge_intermediates`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub books: usize,
    pub units: usize,
    pub failures: Vec<String>,
}

/// Remove intermediate folders from every book and unit under the root.
///
/// Extracted archive units (`*_unzipped`) are deleted entirely when
/// `delete_unzipped` is set. Final texts are never touched.
pub async fn purge_intermediates(
    config: &PipelineConfig,
    delete_unzipped: bool,
) -> Result<PurgeReport, ScanbookError> {
    let mut report = PurgeReport::default();
    for book in list_books(config).await? {
        info!("Purging '{}'", file_name_lossy(&book));
        report.books += 1;
        report
            .failures
            .extend(purge_unit_intermediates(&book, &config.folders, false).await);
        report.failures.extend(sweep_staging_dirs(&book).await);

        // Companions of archives are still units to purge.
        let entries = scan_book(config, &book).await;
        for unit in entries.unit_paths_without_extraction() {
            let extracted = file_name_lossy(&unit).ends_with(UNZIPPED_SUFFIX);
            report.units += 1;
            report.failures.extend(
                purge_unit_intermediates(&unit, &config.folders, delete_unzipped && extracted)
                    .await,
            );
        }
    }
    info!(
        "Purge finished: {} book(s), {} unit(s), {} failure(s)",
        report.books,
        report.units,
        report.failures.len()
    );
    Ok(report)
}

/// Stage of one unit as seen by [`inspect_library`].
#[derive(Debug, Clone, Serialize)]
pub struct UnitStatus {
    pub path: PathBuf,
    pub stage: UnitStage,
    /// The unit is an archive that has not been extracted.
    pub pending_extraction: bool,
}

/// Status of one book as seen by [`inspect_library`].
#[derive(Debug, Clone, Serialize)]
pub struct BookStatusView {
    pub name: String,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<PathBuf>,
    pub units: Vec<UnitStatus>,
}

impl BookStatusView {
    pub fn ready(&self) -> usize {
        self.units.iter().filter(|u| u.stage.is_done()).count()
    }
}

/// Report each book's progress and each unit's stage without changing
/// anything on disk.
pub async fn inspect_library(config: &PipelineConfig) -> Result<Vec<BookStatusView>, ScanbookError> {
    let records = read_progress(&config.progress_path()).await?;
    let mut books = Vec::new();
    for book in list_books(config).await? {
        let name = file_name_lossy(&book);
        let final_dir = book.join(&config.folders.final_texts);
        let mut units = Vec::new();
        for unit in scan_book(config, &book).await.unit_paths_without_extraction() {
            let stage = match inspect_unit(&unit, &final_dir, &config.folders).await {
                Ok(stage) => stage,
                Err(e) => {
                    warn!("Cannot inspect '{}': {}", unit.display(), e);
                    UnitStage::NotStarted
                }
            };
            units.push(UnitStatus {
                stage,
                pending_extraction: !tokio::fs::try_exists(&unit).await.unwrap_or(false),
                path: unit,
            });
        }

        let (complete, cursor) = match records.get(&name) {
            Some(BookProgress::Complete) => (true, None),
            Some(BookProgress::Cursor(c)) => (false, Some(c.clone())),
            None => (false, None),
        };
        books.push(BookStatusView {
            name,
            complete,
            cursor,
            units,
        });
    }
    Ok(books)
}
