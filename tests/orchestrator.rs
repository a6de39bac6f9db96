//! End-to-end runs of the orchestrator over scratch libraries.
//!
//! Stages are replaced by fakes that write the folders their real
//! counterparts would, so no tesseract or image decoding is needed.

use async_trait::async_trait;
use scanbook::naming::chapter_text_name;
use scanbook::{
    BookStatus, FolderNames, Orchestrator, PipelineConfig, SkipReason, Stage, StageKind,
    StageSet, StaleCursorPolicy, UnitError, UnitOutcome,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

type Calls = Arc<Mutex<Vec<(StageKind, String)>>>;

struct FakeStage {
    kind: StageKind,
    folders: FolderNames,
    calls: Calls,
    fail_unit: Option<String>,
}

#[async_trait]
impl Stage for FakeStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn run(&self, unit: &Path) -> Result<(), UnitError> {
        let name = unit.file_name().unwrap().to_string_lossy().into_owned();
        self.calls.lock().unwrap().push((self.kind, name.clone()));
        if self.fail_unit.as_deref() == Some(name.as_str()) {
            return Err(UnitError::StageFailed {
                stage: self.kind,
                unit: unit.to_path_buf(),
                status: "exit status: 2".into(),
                detail: "simulated failure".into(),
            });
        }
        let (dir, file) = match self.kind {
            StageKind::Split => (&self.folders.split, "1.png".to_string()),
            StageKind::Ocr => (&self.folders.ocr, chapter_text_name(&name)),
            StageKind::Clean => (&self.folders.cleaned, chapter_text_name(&name)),
        };
        let out = unit.join(dir);
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join(file), format!("{} of {}", self.kind, name)).unwrap();
        Ok(())
    }
}

struct Library {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl Library {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        Self { _dir: dir, root }
    }

    fn book(&self) -> PathBuf {
        self.root.join("Book")
    }

    fn chapter(&self, name: &str) -> PathBuf {
        let unit = self.book().join(name);
        fs::create_dir_all(&unit).unwrap();
        fs::write(unit.join("1.png"), b"page").unwrap();
        unit
    }

    fn progress_path(&self) -> PathBuf {
        self.root.join("processed_chapters.progress")
    }

    fn progress(&self) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(self.progress_path()).unwrap()).unwrap()
    }

    fn write_cursor(&self, unit: &Path) {
        let json = serde_json::json!({ "Book": unit.to_string_lossy() });
        fs::write(self.progress_path(), json.to_string()).unwrap();
    }

    fn orchestrator(&self, calls: &Calls, fail_unit: Option<&str>) -> Orchestrator {
        self.orchestrator_with(calls, fail_unit, StaleCursorPolicy::Restart)
    }

    fn orchestrator_with(
        &self,
        calls: &Calls,
        fail_unit: Option<&str>,
        policy: StaleCursorPolicy,
    ) -> Orchestrator {
        let config = PipelineConfig::builder()
            .root_dir(&self.root)
            .concurrency(3)
            .stale_cursor(policy)
            .build()
            .unwrap();
        let fake = |kind: StageKind| -> Arc<dyn Stage> {
            Arc::new(FakeStage {
                kind,
                folders: config.folders.clone(),
                calls: calls.clone(),
                fail_unit: (kind == StageKind::Clean)
                    .then(|| fail_unit.map(str::to_string))
                    .flatten(),
            })
        };
        let stages = StageSet {
            split: fake(StageKind::Split),
            ocr: fake(StageKind::Ocr),
            clean: fake(StageKind::Clean),
        };
        Orchestrator::with_stages(config, stages)
    }
}

fn new_calls() -> Calls {
    Arc::new(Mutex::new(Vec::new()))
}

fn units_called(calls: &Calls, kind: StageKind) -> Vec<String> {
    let mut units: Vec<String> = calls
        .lock()
        .unwrap()
        .iter()
        .filter(|(k, _)| *k == kind)
        .map(|(_, u)| u.clone())
        .collect();
    units.sort();
    units
}

fn final_texts(lib: &Library) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(lib.book().join("final_texts"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn two_chapter_book_is_collected_and_completed() {
    let lib = Library::new();
    let a = lib.chapter("Chapter 1");
    let b = lib.chapter("Chapter 2 - The Duel");
    let calls = new_calls();

    let report = lib.orchestrator(&calls, None).run().await.unwrap();

    assert_eq!(report.processed(), 2);
    assert!(!report.has_failures());
    assert_eq!(
        report.book("Book").unwrap().status,
        BookStatus::Completed {
            collected: 2,
            previously_complete: false
        }
    );
    assert_eq!(
        final_texts(&lib),
        vec!["Chapter_0001.txt", "Chapter_0002_The_Duel.txt"]
    );
    for unit in [&a, &b] {
        assert!(unit.join("1.png").exists());
        assert!(!unit.join("images_processed").exists());
        assert!(!unit.join("sortieTXT").exists());
        assert!(!unit.join("sortieTXT_cleaned").exists());
    }
    assert_eq!(lib.progress()["Book"], serde_json::Value::Bool(true));
    assert!(!lib.root.join("global_errors.log").exists());
}

#[tokio::test]
async fn cleaned_chapter_is_collected_without_stages() {
    let lib = Library::new();
    let done = lib.chapter("Chapter 1");
    let raw = lib.chapter("Chapter 2");
    let cleaned = done.join("sortieTXT_cleaned");
    fs::create_dir_all(&cleaned).unwrap();
    fs::write(cleaned.join("Chapter_0001.txt"), "already cleaned").unwrap();
    let calls = new_calls();

    let report = lib.orchestrator(&calls, None).run().await.unwrap();

    assert!(calls
        .lock()
        .unwrap()
        .iter()
        .all(|(_, unit)| unit != "Chapter 1"));
    assert_eq!(units_called(&calls, StageKind::Split), vec!["Chapter 2"]);
    assert_eq!(units_called(&calls, StageKind::Clean), vec!["Chapter 2"]);
    let seeded = report.units.iter().find(|u| u.unit == done).unwrap();
    assert_eq!(
        seeded.outcome,
        UnitOutcome::Skipped {
            reason: SkipReason::CleanedTextPresent
        }
    );

    assert_eq!(final_texts(&lib), vec!["Chapter_0001.txt", "Chapter_0002.txt"]);
    assert_eq!(
        fs::read_to_string(lib.book().join("final_texts/Chapter_0001.txt")).unwrap(),
        "already cleaned"
    );
    for unit in [&done, &raw] {
        assert!(!unit.join("images_processed").exists());
        assert!(!unit.join("sortieTXT").exists());
        assert!(!unit.join("sortieTXT_cleaned").exists());
    }
    assert_eq!(lib.progress()["Book"], serde_json::Value::Bool(true));
}

#[tokio::test]
async fn second_run_does_no_work() {
    let lib = Library::new();
    lib.chapter("Chapter 1");
    lib.chapter("Chapter 2");

    lib.orchestrator(&new_calls(), None).run().await.unwrap();
    let before = final_texts(&lib);
    let first = fs::read_to_string(lib.book().join("final_texts/Chapter_0001.txt")).unwrap();

    let calls = new_calls();
    let report = lib.orchestrator(&calls, None).run().await.unwrap();

    assert!(calls.lock().unwrap().is_empty());
    assert!(report.units.is_empty());
    assert_eq!(report.book("Book").unwrap().submitted, 0);
    assert_eq!(
        report.book("Book").unwrap().status,
        BookStatus::Completed {
            collected: 0,
            previously_complete: true
        }
    );
    assert_eq!(final_texts(&lib), before);
    assert_eq!(
        fs::read_to_string(lib.book().join("final_texts/Chapter_0001.txt")).unwrap(),
        first
    );
    assert_eq!(lib.progress()["Book"], serde_json::Value::Bool(true));
}

#[tokio::test]
async fn resumes_after_stored_cursor() {
    let lib = Library::new();
    lib.chapter("Chapter 1");
    let b = lib.chapter("Chapter 2");
    lib.chapter("Chapter 3");
    let d = lib.chapter("Chapter 4");
    lib.write_cursor(&b);
    let calls = new_calls();

    let report = lib.orchestrator(&calls, None).run().await.unwrap();

    assert_eq!(units_called(&calls, StageKind::Split), vec!["Chapter 3", "Chapter 4"]);
    let book = report.book("Book").unwrap();
    assert_eq!(book.submitted, 2);
    assert!(!book.stale_cursor);
    // Chapters 1 and 2 never produced cleaned text in this scratch library.
    assert_eq!(book.status, BookStatus::Incomplete { ready: 2, total: 4 });
    assert_eq!(
        lib.progress()["Book"],
        serde_json::Value::String(d.to_string_lossy().into_owned())
    );
}

#[tokio::test]
async fn failing_unit_does_not_block_others() {
    let lib = Library::new();
    let a = lib.chapter("Chapter 1");
    let b = lib.chapter("Chapter 2");
    lib.chapter("Chapter 3");
    let calls = new_calls();

    let report = lib
        .orchestrator(&calls, Some("Chapter 2"))
        .run()
        .await
        .unwrap();

    assert_eq!(report.processed(), 2);
    assert_eq!(report.failed(), 1);
    assert!(report.has_failures());
    let failed = report
        .units
        .iter()
        .find(|u| matches!(u.outcome, UnitOutcome::Failed { .. }))
        .unwrap();
    assert_eq!(failed.unit, b);

    // Chapter 3 finished but sits past the unfinished chapter 2.
    assert_eq!(
        lib.progress()["Book"],
        serde_json::Value::String(a.to_string_lossy().into_owned())
    );
    assert_eq!(
        report.book("Book").unwrap().status,
        BookStatus::Incomplete { ready: 2, total: 3 }
    );
    assert!(!lib.book().join("final_texts").exists());
    assert!(b.join("sortieTXT").exists());

    let journal = fs::read_to_string(lib.root.join("global_errors.log")).unwrap();
    assert!(journal.contains("[CHAPTER: Chapter 2]"));
    assert!(journal.contains("[STAGE: clean]"));
}

#[tokio::test]
async fn failed_unit_is_finished_by_next_run() {
    let lib = Library::new();
    lib.chapter("Chapter 1");
    lib.chapter("Chapter 2");

    lib.orchestrator(&new_calls(), Some("Chapter 2"))
        .run()
        .await
        .unwrap();

    let calls = new_calls();
    let report = lib.orchestrator(&calls, None).run().await.unwrap();

    // Raw OCR text survived the failure, so only cleaning is repeated.
    assert_eq!(units_called(&calls, StageKind::Clean), vec!["Chapter 2"]);
    assert!(units_called(&calls, StageKind::Split).is_empty());
    assert!(matches!(
        report.book("Book").unwrap().status,
        BookStatus::Completed { collected: 2, .. }
    ));
    assert_eq!(lib.progress()["Book"], serde_json::Value::Bool(true));
}

#[tokio::test]
async fn stale_cursor_restart_resubmits_every_unit() {
    let lib = Library::new();
    lib.chapter("Chapter 1");
    lib.chapter("Chapter 2");
    lib.write_cursor(&lib.book().join("Chapter 99"));
    let calls = new_calls();

    let report = lib
        .orchestrator_with(&calls, None, StaleCursorPolicy::Restart)
        .run()
        .await
        .unwrap();

    let book = report.book("Book").unwrap();
    assert!(book.stale_cursor);
    assert_eq!(book.submitted, 2);
    assert_eq!(units_called(&calls, StageKind::Split), vec!["Chapter 1", "Chapter 2"]);
    assert_eq!(lib.progress()["Book"], serde_json::Value::Bool(true));
}

#[tokio::test]
async fn stale_cursor_skip_leaves_book_alone() {
    let lib = Library::new();
    lib.chapter("Chapter 1");
    let gone = lib.book().join("Chapter 99");
    lib.write_cursor(&gone);
    let calls = new_calls();

    let report = lib
        .orchestrator_with(&calls, None, StaleCursorPolicy::Skip)
        .run()
        .await
        .unwrap();

    let book = report.book("Book").unwrap();
    assert!(book.stale_cursor);
    assert_eq!(book.submitted, 0);
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(
        lib.progress()["Book"],
        serde_json::Value::String(gone.to_string_lossy().into_owned())
    );
    let journal = fs::read_to_string(lib.root.join("global_errors.log")).unwrap();
    assert!(journal.contains("matches no current unit"));
}

#[tokio::test]
async fn archive_chapter_is_extracted_processed_and_removed() {
    let lib = Library::new();
    lib.chapter("Chapter 1");
    let archive = lib.book().join("Chapter 2.cbz");
    {
        let file = fs::File::create(&archive).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("pages/page01.jpg", options).unwrap();
        zip.write_all(b"jpeg bytes").unwrap();
        zip.start_file("pages/page02.jpg", options).unwrap();
        zip.write_all(b"more bytes").unwrap();
        zip.finish().unwrap();
    }
    let leftover = lib.book().join(".extract-a1b2c3");
    fs::create_dir_all(leftover.join("pages")).unwrap();
    let calls = new_calls();

    let report = lib.orchestrator(&calls, None).run().await.unwrap();

    assert_eq!(
        units_called(&calls, StageKind::Split),
        vec!["Chapter 1", "Chapter 2_unzipped"]
    );
    assert!(matches!(
        report.book("Book").unwrap().status,
        BookStatus::Completed { collected: 2, .. }
    ));
    assert_eq!(final_texts(&lib), vec!["Chapter_0001.txt", "Chapter_0002.txt"]);
    assert!(archive.exists());
    assert!(!lib.book().join("Chapter 2_unzipped").exists());
    assert!(!leftover.exists());
}

#[tokio::test]
async fn corrupt_archive_is_reported_not_fatal() {
    let lib = Library::new();
    lib.chapter("Chapter 1");
    fs::write(lib.book().join("Chapter 2.cbz"), b"not a zip").unwrap();

    let report = lib.orchestrator(&new_calls(), None).run().await.unwrap();

    assert_eq!(report.processed(), 1);
    assert_eq!(report.errors.len(), 1);
    assert!(matches!(report.errors[0], UnitError::CorruptArchive { .. }));
    assert!(report.has_failures());
}

#[tokio::test]
async fn empty_book_is_never_completed() {
    let lib = Library::new();
    fs::create_dir_all(lib.book()).unwrap();

    let report = lib.orchestrator(&new_calls(), None).run().await.unwrap();

    assert_eq!(report.book("Book").unwrap().status, BookStatus::Empty);
    assert!(!lib.progress_path().exists() || lib.progress().get("Book").is_none());
}

#[test]
fn run_sync_handles_empty_library() {
    let lib = Library::new();
    let config = PipelineConfig::builder().root_dir(&lib.root).build().unwrap();

    let report = scanbook::run_sync(&config).unwrap();

    assert!(report.books.is_empty());
    assert!(!report.has_failures());
}
