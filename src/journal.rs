//! Global error journal.
//!
//! A plain-text, append-only file collecting every failure of a run in one
//! place, independent of log verbosity. Entries look like:
//!
//! ```text
//! [2024-05-01 12:00:00] [CHAPTER: Chapter 3] [STAGE: ocr] ERROR: ocr stage failed ...
//! Details: tesseract exited 1
//!
//! ```
//!
//! The journal is truncated when a run starts and never read back.

use crate::error::UnitError;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, warn};

#[derive(Debug)]
pub struct ErrorJournal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ErrorJournal {
    /// Open the journal at `path`, discarding the previous run's entries.
    pub async fn create(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not reset error journal '{}': {}", path.display(), e);
            }
        }
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. `chapter` is usually a unit or book path; only its
    /// final component is written.
    pub async fn record(&self, chapter: &Path, stage: &str, message: &str, details: &str) {
        let chapter_name = chapter
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "N/A".to_string());
        let entry = format!(
            "[{}] [CHAPTER: {}] [STAGE: {}] ERROR: {}\nDetails: {}\n\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            chapter_name,
            stage,
            message,
            details
        );
        error!("[GLOBAL_ERROR] [{}] [{}] {}", chapter_name, stage, message);

        let _guard = self.lock.lock().await;
        if let Err(e) = self.append(entry.as_bytes()).await {
            warn!("Could not write error journal '{}': {}", self.path.display(), e);
        }
    }

    /// Append an entry describing `err` for `unit`.
    pub async fn record_unit_error(&self, unit: &Path, err: &UnitError) {
        let stage = err
            .stage()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "orchestrator".to_string());
        let details = match err {
            UnitError::StageFailed { status, detail, .. } => format!("{status}\n{detail}"),
            UnitError::StageTimeout { secs, .. } => format!("no result after {secs}s"),
            UnitError::MissingInput { what, .. } => what.clone(),
            UnitError::CorruptArchive { detail, .. }
            | UnitError::ExtractionFailed { detail, .. }
            | UnitError::ProgressPersistence { detail, .. }
            | UnitError::Io { detail, .. } => detail.clone(),
        };
        self.record(unit, &stage, &err.to_string(), &details).await;
    }

    async fn append(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await
    }
}
