//! Per-unit pipeline: split → OCR → clean, resuming from what is on disk.
//!
//! ```text
//! NotStarted ──split──▶ images ──ocr──▶ raw text ──clean──▶ cleaned ──▶ progress
//! RawOcrPresent ─────────────────────────────────clean──▶ cleaned ──▶ progress
//! CleanedPresent / FinalPresent ─────────────────────────────────────▶ progress
//! ```
//!
//! After OCR succeeds the split images are deleted; after clean succeeds the
//! raw OCR text is deleted. A failing stage stops the unit where it is: the
//! last good intermediate output stays on disk and progress is not advanced,
//! so the next run picks up from there.

use crate::config::PipelineConfig;
use crate::error::UnitError;
use crate::inspect::{inspect_unit, UnitStage};
use crate::journal::ErrorJournal;
use crate::output::{SkipReason, UnitOutcome, UnitReport};
use crate::stage::{StageKind, StageSet};
use crate::store::ProgressStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Runs the remaining stages of one chapter unit.
#[derive(Clone)]
pub struct ChapterPipeline {
    config: Arc<PipelineConfig>,
    stages: StageSet,
    store: Arc<ProgressStore>,
    journal: Arc<ErrorJournal>,
}

impl ChapterPipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        stages: StageSet,
        store: Arc<ProgressStore>,
        journal: Arc<ErrorJournal>,
    ) -> Self {
        Self {
            config,
            stages,
            store,
            journal,
        }
    }

    /// Bring `unit` of `book` to the cleaned state and record its progress.
    ///
    /// Never returns an error: failures are reported in the outcome, logged
    /// and journaled.
    pub async fn run(&self, unit: &Path, book: &str) -> UnitReport {
        let start = Instant::now();
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_unit_start(book, unit);
        }

        let outcome = match self.process(unit).await {
            Ok(outcome) => outcome,
            Err(error) => {
                error!("Unit '{}' of '{}' aborted: {}", unit.display(), book, error);
                self.journal.record_unit_error(unit, &error).await;
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_unit_error(book, unit, &error.to_string());
                }
                return UnitReport {
                    book: book.to_string(),
                    unit: unit.to_path_buf(),
                    outcome: UnitOutcome::Failed { error },
                    progress_error: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
        };

        let progress_error = match self.store.mark_unit_done(book, unit).await {
            Ok(()) => None,
            Err(e) => {
                self.journal.record_unit_error(unit, &e).await;
                Some(e)
            }
        };

        info!("Unit '{}' {}", unit.display(), outcome);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_unit_complete(book, unit, &outcome);
        }

        UnitReport {
            book: book.to_string(),
            unit: unit.to_path_buf(),
            outcome,
            progress_error,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn process(&self, unit: &Path) -> Result<UnitOutcome, UnitError> {
        let folders = &self.config.folders;
        let final_dir = self.config.final_dir_for(unit);
        let state = inspect_unit(unit, &final_dir, folders).await?;
        debug!("Unit '{}' state: {}", unit.display(), state);

        match state {
            UnitStage::FinalPresent => Ok(UnitOutcome::Skipped {
                reason: SkipReason::FinalTextPresent,
            }),
            UnitStage::CleanedPresent => Ok(UnitOutcome::Skipped {
                reason: SkipReason::CleanedTextPresent,
            }),
            UnitStage::RawOcrPresent => {
                info!("Raw OCR found for '{}'; cleaning only", unit.display());
                self.run_stage(StageKind::Clean, unit).await?;
                remove_stage_dir(&unit.join(&folders.ocr)).await;
                Ok(UnitOutcome::Processed {
                    stages: vec![StageKind::Clean],
                })
            }
            UnitStage::NotStarted => {
                self.run_stage(StageKind::Split, unit).await?;
                self.run_stage(StageKind::Ocr, unit).await?;
                remove_stage_dir(&unit.join(&folders.split)).await;
                self.run_stage(StageKind::Clean, unit).await?;
                remove_stage_dir(&unit.join(&folders.ocr)).await;
                Ok(UnitOutcome::Processed {
                    stages: vec![StageKind::Split, StageKind::Ocr, StageKind::Clean],
                })
            }
        }
    }

    /// Run one stage under the configured timeout.
    async fn run_stage(&self, kind: StageKind, unit: &Path) -> Result<(), UnitError> {
        let stage = self.stages.get(kind);
        debug!("→ {} '{}'", kind, unit.display());
        let Some(limit) = self.config.stage_timeout() else {
            return stage.run(unit).await;
        };
        match tokio::time::timeout(limit, stage.run(unit)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} stage exceeded {:?} for '{}'", kind, limit, unit.display());
                Err(UnitError::StageTimeout {
                    stage: kind,
                    unit: unit.to_path_buf(),
                    secs: limit.as_secs(),
                })
            }
        }
    }
}

/// Delete an intermediate folder; absence is fine, other failures are logged.
pub(crate) async fn remove_stage_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Removed '{}'", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove '{}': {}", dir.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FolderNames;
    use crate::stage::Stage;
    use crate::store::BookProgress;
    use async_trait::async_trait;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Writes the output its real counterpart would, and records each call.
    struct FakeStage {
        kind: StageKind,
        folders: FolderNames,
        calls: Arc<Mutex<Vec<StageKind>>>,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Stage for FakeStage {
        fn kind(&self) -> StageKind {
            self.kind
        }

        async fn run(&self, unit: &Path) -> Result<(), UnitError> {
            self.calls.lock().unwrap().push(self.kind);
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            if self.fail {
                return Err(UnitError::StageFailed {
                    stage: self.kind,
                    unit: unit.to_path_buf(),
                    status: "exit status: 1".into(),
                    detail: "fake failure".into(),
                });
            }
            let dir = match self.kind {
                StageKind::Split => &self.folders.split,
                StageKind::Ocr => &self.folders.ocr,
                StageKind::Clean => &self.folders.cleaned,
            };
            let out = unit.join(dir);
            fs::create_dir_all(&out).unwrap();
            let name = if self.kind == StageKind::Split { "1.png" } else { "Chapter_0001.txt" };
            fs::write(out.join(name), "data").unwrap();
            Ok(())
        }
    }

    struct Fixture {
        _root: tempfile::TempDir,
        unit: PathBuf,
        calls: Arc<Mutex<Vec<StageKind>>>,
        store: Arc<ProgressStore>,
        pipeline: ChapterPipeline,
    }

    async fn fixture(failing: Option<StageKind>, slow: Option<StageKind>, timeout_secs: u64) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let unit = root.path().join("Book").join("Chapter 1");
        fs::create_dir_all(&unit).unwrap();

        let config = Arc::new(
            PipelineConfig::builder()
                .root_dir(root.path())
                .stage_timeout_secs(timeout_secs)
                .build()
                .unwrap(),
        );
        let calls = Arc::new(Mutex::new(Vec::new()));
        let fake = |kind: StageKind| -> Arc<dyn Stage> {
            Arc::new(FakeStage {
                kind,
                folders: config.folders.clone(),
                calls: calls.clone(),
                fail: failing == Some(kind),
                delay: (slow == Some(kind)).then(|| Duration::from_secs(5)),
            })
        };
        let stages = StageSet {
            split: fake(StageKind::Split),
            ocr: fake(StageKind::Ocr),
            clean: fake(StageKind::Clean),
        };
        let store = Arc::new(ProgressStore::load(config.progress_path()).await.unwrap());
        let journal = Arc::new(ErrorJournal::create(config.error_log_path()).await);
        let pipeline = ChapterPipeline::new(config, stages, store.clone(), journal);
        Fixture {
            _root: root,
            unit,
            calls,
            store,
            pipeline,
        }
    }

    #[tokio::test]
    async fn fresh_unit_runs_all_stages() {
        let f = fixture(None, None, 0).await;
        let report = f.pipeline.run(&f.unit, "Book").await;

        assert!(report.outcome.is_done());
        assert_eq!(
            *f.calls.lock().unwrap(),
            vec![StageKind::Split, StageKind::Ocr, StageKind::Clean]
        );
        assert!(!f.unit.join("images_processed").exists());
        assert!(!f.unit.join("sortieTXT").exists());
        assert!(f.unit.join("sortieTXT_cleaned").join("Chapter_0001.txt").exists());
        assert_eq!(
            f.store.get("Book").await,
            Some(BookProgress::Cursor(f.unit.clone()))
        );
    }

    #[tokio::test]
    async fn raw_ocr_only_needs_cleaning() {
        let f = fixture(None, None, 0).await;
        fs::create_dir_all(f.unit.join("sortieTXT")).unwrap();
        fs::write(f.unit.join("sortieTXT").join("Chapter_0001.txt"), "raw").unwrap();

        let report = f.pipeline.run(&f.unit, "Book").await;
        assert_eq!(
            report.outcome,
            UnitOutcome::Processed {
                stages: vec![StageKind::Clean]
            }
        );
        assert_eq!(*f.calls.lock().unwrap(), vec![StageKind::Clean]);
        assert!(!f.unit.join("sortieTXT").exists());
    }

    #[tokio::test]
    async fn cleaned_unit_is_skipped_but_recorded() {
        let f = fixture(None, None, 0).await;
        fs::create_dir_all(f.unit.join("sortieTXT_cleaned")).unwrap();
        fs::write(f.unit.join("sortieTXT_cleaned").join("Chapter_0001.txt"), "x").unwrap();

        let report = f.pipeline.run(&f.unit, "Book").await;
        assert_eq!(
            report.outcome,
            UnitOutcome::Skipped {
                reason: SkipReason::CleanedTextPresent
            }
        );
        assert!(f.calls.lock().unwrap().is_empty());
        assert!(f.store.get("Book").await.is_some());
    }

    #[tokio::test]
    async fn failing_stage_keeps_last_good_state() {
        let f = fixture(Some(StageKind::Ocr), None, 0).await;
        let report = f.pipeline.run(&f.unit, "Book").await;

        match &report.outcome {
            UnitOutcome::Failed { error } => assert_eq!(error.stage(), Some(StageKind::Ocr)),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(f.unit.join("images_processed").exists());
        assert_eq!(f.store.get("Book").await, None);
        let journal = fs::read_to_string(f._root.path().join("global_errors.log")).unwrap();
        assert!(journal.contains("[STAGE: ocr]"));
    }

    #[tokio::test]
    async fn slow_stage_times_out() {
        let f = fixture(None, Some(StageKind::Split), 1).await;
        let report = f.pipeline.run(&f.unit, "Book").await;

        match report.outcome {
            UnitOutcome::Failed {
                error: UnitError::StageTimeout { stage, secs, .. },
            } => {
                assert_eq!(stage, StageKind::Split);
                assert_eq!(secs, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(*f.calls.lock().unwrap(), vec![StageKind::Split]);
    }
}
