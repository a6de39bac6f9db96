//! Processing stages run against a single chapter unit.
//!
//! ## Stage contract
//!
//! A stage receives the unit directory and either succeeds or returns a
//! [`UnitError`]. Outputs land in well-known subdirectories of the unit (see
//! [`crate::config::FolderNames`]); the [`crate::inspect`] module reads them
//! back to decide what still has to run. Stages are idempotent: running one
//! twice over the same input overwrites its output with equal content.
//!
//! ```text
//!  unit/1.png ──split──▶ unit/images_processed/*.png
//!             ──ocr────▶ unit/sortieTXT/Chapter_NNNN_Title.txt
//!             ──clean──▶ unit/sortieTXT_cleaned/Chapter_NNNN_Title.txt
//! ```
//!
//! Each stage is either built in (in-process, see [`split`], [`ocr`],
//! [`clean`]) or an external program wrapped by [`command::CommandStage`].

pub mod clean;
pub mod command;
pub mod ocr;
pub mod split;

use crate::config::{PipelineConfig, StageSpec};
use crate::error::UnitError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

pub use clean::CleanStage;
pub use command::CommandStage;
pub use ocr::TesseractStage;
pub use split::SplitStage;

/// The three per-unit stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Split,
    Ocr,
    Clean,
}

impl StageKind {
    /// Name of the log file a stage keeps inside the unit directory.
    pub fn log_file_name(self) -> &'static str {
        match self {
            StageKind::Split => "split_errors.log",
            StageKind::Ocr => "ocr_errors.log",
            StageKind::Clean => "clean_errors.log",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageKind::Split => "split",
            StageKind::Ocr => "ocr",
            StageKind::Clean => "clean",
        })
    }
}

/// One processing step applied to a chapter unit directory.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Process `unit`. On error the unit is left as it was before the call
    /// or with partial output that the next attempt overwrites.
    async fn run(&self, unit: &Path) -> Result<(), UnitError>;
}

/// The split, OCR and clean stages used by a run.
#[derive(Clone)]
pub struct StageSet {
    pub split: Arc<dyn Stage>,
    pub ocr: Arc<dyn Stage>,
    pub clean: Arc<dyn Stage>,
}

impl StageSet {
    /// Build the stage set described by `config`.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let pick = |kind: StageKind, spec: &StageSpec, builtin: Arc<dyn Stage>| -> Arc<dyn Stage> {
            match spec {
                StageSpec::Builtin => builtin,
                StageSpec::Command { program, args } => {
                    Arc::new(CommandStage::new(kind, program.clone(), args.clone()))
                }
            }
        };

        Self {
            split: pick(
                StageKind::Split,
                &config.split,
                Arc::new(SplitStage::new(config.max_image_height, &config.folders.split)),
            ),
            ocr: pick(
                StageKind::Ocr,
                &config.ocr,
                Arc::new(TesseractStage::new(
                    &config.tesseract_bin,
                    &config.ocr_language,
                    &config.folders,
                )),
            ),
            clean: pick(
                StageKind::Clean,
                &config.clean,
                Arc::new(CleanStage::new(&config.folders)),
            ),
        }
    }

    pub fn get(&self, kind: StageKind) -> &Arc<dyn Stage> {
        match kind {
            StageKind::Split => &self.split,
            StageKind::Ocr => &self.ocr,
            StageKind::Clean => &self.clean,
        }
    }
}

// ── Per-unit stage log ───────────────────────────────────────────────────────

/// Append-only diagnostics file kept by a built-in stage inside the unit.
///
/// Write failures are logged and otherwise ignored: the log is advisory and
/// never read back by the pipeline.
#[derive(Debug, Clone)]
pub(crate) struct StageLog {
    path: PathBuf,
}

impl StageLog {
    /// Start a fresh log for `kind` in `unit`, removing the previous run's file.
    pub(crate) fn fresh(unit: &Path, kind: StageKind) -> Self {
        let path = unit.join(kind.log_file_name());
        warn_unless_missing(&path, std::fs::remove_file(&path));
        Self { path }
    }

    /// [`StageLog::fresh`] for stages running on the async executor.
    pub(crate) async fn fresh_async(unit: &Path, kind: StageKind) -> Self {
        let path = unit.join(kind.log_file_name());
        warn_unless_missing(&path, tokio::fs::remove_file(&path).await);
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn append(&self, message: &str) {
        let line = format!(
            "{} - {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            message
        );
        let written = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = written {
            warn!("Could not write {}: {}", self.path.display(), e);
        }
    }

    /// [`StageLog::append`] on the blocking pool.
    pub(crate) async fn append_async(&self, message: &str) {
        let log = self.clone();
        let message = message.to_string();
        if let Err(e) = tokio::task::spawn_blocking(move || log.append(&message)).await {
            warn!("Could not write {}: {}", self.path.display(), e);
        }
    }
}

fn warn_unless_missing(path: &Path, removed: std::io::Result<()>) {
    if let Err(e) = removed {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove old log {}: {}", path.display(), e);
        }
    }
}
