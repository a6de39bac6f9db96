//! # scanbook
//!
//! Turn folders of scanned comic and manga chapters into cleaned, chaptered
//! text files with a resumable, concurrent OCR pipeline.
//!
//! ## Library layout
//!
//! ```text
//! <root>/
//!  ├─ One Piece/                  ← book
//!  │   ├─ Chapter 1/              ← chapter unit (directory of pages)
//!  │   ├─ Chapter 2.cbz           ← chapter unit (archive, extracted to Chapter 2_unzipped/)
//!  │   └─ final_texts/            ← collected Chapter_0001.txt, Chapter_0002_Title.txt, …
//!  └─ processed_chapters.progress ← resume points
//! ```
//!
//! ## Pipeline Overview
//!
//! ```text
//! chapter unit
//!  │
//!  ├─ 1. Inspect  find the most advanced output already on disk
//!  ├─ 2. Split    cut tall pages into bands (image crate, spawn_blocking)
//!  ├─ 3. OCR      tesseract per band, joined into one raw text
//!  ├─ 4. Clean    10-rule text cleanup
//!  └─ 5. Record   advance the book's cursor (atomic JSON write)
//!
//! book (after all its units finished)
//!  └─ Collect     copy cleaned texts to final_texts/, purge intermediates, mark complete
//! ```
//!
//! Up to `concurrency` units run at once. Killing the process at any point
//! and starting again resumes where it stopped: finished units are detected
//! on disk and never reprocessed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scanbook::{run, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .root_dir("/data/novels")
//!         .ocr_language("eng")
//!         .concurrency(4)
//!         .build()?;
//!     let report = run(&config).await?;
//!     eprintln!(
//!         "{} processed, {} skipped, {} failed",
//!         report.processed(),
//!         report.skipped(),
//!         report.failed()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scanbook` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! scanbook = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod archive;
pub mod config;
pub mod error;
pub mod inspect;
pub mod journal;
pub mod maintenance;
pub mod naming;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod stage;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use archive::extract_archive;
pub use config::{FolderNames, PipelineConfig, PipelineConfigBuilder, StageSpec, StaleCursorPolicy};
pub use error::{ScanbookError, UnitError};
pub use inspect::{inspect, inspect_unit, UnitStage};
pub use maintenance::{inspect_library, purge_intermediates, BookStatusView, PurgeReport};
pub use orchestrator::{run, run_sync, Orchestrator};
pub use output::{BookReport, BookStatus, RunReport, SkipReason, UnitOutcome, UnitReport};
pub use pipeline::ChapterPipeline;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use stage::{Stage, StageKind, StageSet};
pub use store::{BookProgress, ProgressStore};
