//! Error types for the scanbook library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ScanbookError`] is **fatal**: the run cannot proceed at all (the books
//!   root cannot be listed, the configuration is invalid, the progress file
//!   cannot be read). Returned as `Err(ScanbookError)` from the top-level
//!   `run*` functions.
//!
//! * [`UnitError`] is **non-fatal**: one chapter unit failed (a stage exited
//!   non-zero, an archive is corrupt, a progress snapshot could not be
//!   written) but every other unit and book carries on. Stored inside
//!   [`crate::output::UnitOutcome`] so callers can inspect partial success.
//!
//! Re-running the orchestrator is always a valid recovery for a `UnitError`:
//! every stage is idempotent and finished work is detected on disk.

use std::path::PathBuf;
use thiserror::Error;

use crate::stage::StageKind;

/// All fatal errors returned by the scanbook library.
///
/// Unit-level failures use [`UnitError`] and are reported in
/// [`crate::output::RunReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum ScanbookError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The books root directory does not exist or cannot be listed.
    #[error("Cannot read books root '{path}': {source}\nCheck the path exists and is a readable directory.")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The progress file exists but could not be read.
    #[error("Cannot read progress file '{path}': {source}")]
    ProgressUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single chapter unit.
///
/// The unit is left in its last good intermediate state and its progress is
/// not advanced; other units keep running.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum UnitError {
    /// A stage ran but reported failure.
    #[error("{stage} stage failed for '{unit}' ({status}): {detail}")]
    StageFailed {
        stage: StageKind,
        unit: PathBuf,
        status: String,
        detail: String,
    },

    /// A stage did not finish within the configured timeout.
    #[error("{stage} stage timed out after {secs}s for '{unit}'")]
    StageTimeout {
        stage: StageKind,
        unit: PathBuf,
        secs: u64,
    },

    /// An expected input directory or file is absent.
    #[error("Missing input for '{unit}': {what}")]
    MissingInput { unit: PathBuf, what: String },

    /// The archive is not a valid ZIP container.
    #[error("Archive '{path}' is corrupt: {detail}")]
    CorruptArchive { path: PathBuf, detail: String },

    /// The archive opened but could not be extracted.
    #[error("Extraction of '{path}' failed: {detail}")]
    ExtractionFailed { path: PathBuf, detail: String },

    /// A progress snapshot could not be persisted.
    #[error("Failed to save progress file '{path}': {detail}")]
    ProgressPersistence { path: PathBuf, detail: String },

    /// Any other filesystem failure while handling a unit.
    #[error("I/O error on '{path}': {detail}")]
    Io { path: PathBuf, detail: String },
}

impl UnitError {
    /// Wrap an [`std::io::Error`] raised while touching `path`.
    pub fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        UnitError::Io {
            path: path.into(),
            detail: err.to_string(),
        }
    }

    /// The stage this error belongs to, when it came from a stage.
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            UnitError::StageFailed { stage, .. } | UnitError::StageTimeout { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }
}
