//! Progress-callback trait for per-unit and per-book run events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the orchestrator processes chapter units.
//!
//! # Example
//!
//! ```rust
//! use scanbook::{PipelineConfig, PipelineProgressCallback, UnitOutcome};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_unit_complete(&self, book: &str, unit: &Path, outcome: &UnitOutcome) {
//!         let done = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}: {book}/{} -> {outcome}", unit.display());
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .root_dir("/data/novels")
//!     .progress_callback(Arc::new(CountingCallback { finished: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{RunReport, UnitOutcome};
use std::path::Path;
use std::sync::Arc;

/// Called by the orchestrator as it processes books and chapter units.
///
/// Implementations must be `Send + Sync`: unit events fire concurrently from
/// up to `concurrency` in-flight pipelines. All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once after discovery, before any unit is dispatched.
    ///
    /// # Arguments
    /// * `total_units`: units submitted to the worker pool this run
    fn on_run_start(&self, total_units: usize) {
        let _ = total_units;
    }

    /// Called when a chapter pipeline starts on `unit`.
    fn on_unit_start(&self, book: &str, unit: &Path) {
        let _ = (book, unit);
    }

    /// Called when a unit finished, either processed or skipped.
    fn on_unit_complete(&self, book: &str, unit: &Path, outcome: &UnitOutcome) {
        let _ = (book, unit, outcome);
    }

    /// Called when a unit's pipeline aborted.
    ///
    /// # Arguments
    /// * `error`: human-readable error description
    fn on_unit_error(&self, book: &str, unit: &Path, error: &str) {
        let _ = (book, unit, error);
    }

    /// Called when a book was collected and marked complete.
    ///
    /// # Arguments
    /// * `collected`: number of text files copied to the final directory
    fn on_book_complete(&self, book: &str, collected: usize) {
        let _ = (book, collected);
    }

    /// Called once after post-processing of every book.
    fn on_run_complete(&self, report: &RunReport) {
        let _ = report;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
