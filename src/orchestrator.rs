//! Library-wide orchestration: discover books and units, run chapter
//! pipelines concurrently, then collect finished books.
//!
//! ## Run phases
//!
//! 1. **Discover**: every non-excluded directory under the root is a book.
//!    Inside a book, every directory that is not excluded and not one of the
//!    pipeline's own folders is a chapter unit, and every `.cbz` archive is
//!    extracted into a `<name>_unzipped` unit.
//! 2. **Plan**: books already marked complete submit nothing. Other books
//!    submit the units after their stored cursor, or all units when there is
//!    no cursor. A cursor that matches no unit follows the configured
//!    [`StaleCursorPolicy`].
//! 3. **Execute**: submitted units run through [`ChapterPipeline`] with at
//!    most `concurrency` in flight (`buffer_unordered`). Unit order inside a
//!    book is not guaranteed.
//! 4. **Collect**: once every task has finished, each book whose units all
//!    hold cleaned text (or already have a final text) gets its texts copied
//!    into the final folder, its intermediates removed and its extracted
//!    archive units deleted, and is marked complete.

use crate::archive::{self, UNZIPPED_SUFFIX};
use crate::config::{PipelineConfig, StaleCursorPolicy};
use crate::error::{ScanbookError, UnitError};
use crate::inspect::{inspect_unit, list_text_files, UnitStage};
use crate::journal::ErrorJournal;
use crate::maintenance::purge_unit_intermediates;
use crate::naming::{file_name_lossy, sort_paths_natural};
use crate::output::{BookReport, BookStatus, RunReport, UnitReport};
use crate::pipeline::ChapterPipeline;
use crate::stage::StageSet;
use crate::store::{resume_point, BookProgress, ProgressStore, Resume};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Runs the whole library.
pub struct Orchestrator {
    config: Arc<PipelineConfig>,
    stages: StageSet,
}

/// A book's discovered units and submission plan.
struct BookPlan {
    name: String,
    path: PathBuf,
    units: Vec<PathBuf>,
    submitted: usize,
    stale_cursor: bool,
    previously_complete: bool,
}

impl Orchestrator {
    /// Orchestrator with the stages described by `config`.
    pub fn new(config: PipelineConfig) -> Self {
        let stages = StageSet::from_config(&config);
        Self::with_stages(config, stages)
    }

    /// Orchestrator with caller-supplied stages.
    pub fn with_stages(config: PipelineConfig, stages: StageSet) -> Self {
        Self {
            config: Arc::new(config),
            stages,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process every book under the root.
    ///
    /// # Errors
    /// Only fatal problems are returned: an unreadable root or progress
    /// file. Unit and book failures are reported in the [`RunReport`].
    pub async fn run(&self) -> Result<RunReport, ScanbookError> {
        let start = Instant::now();
        let config = &self.config;
        let mut report = RunReport {
            started_at: chrono::Local::now().to_rfc3339(),
            ..Default::default()
        };
        info!("Starting run over '{}'", config.root_dir.display());

        // ── Step 1: Load state ───────────────────────────────────────────
        let books = list_books(config).await?;
        let store = Arc::new(ProgressStore::load(config.progress_path()).await?);
        let journal = Arc::new(ErrorJournal::create(config.error_log_path()).await);
        log_resume_points(&store).await;

        // ── Step 2: Discover units and plan submissions ──────────────────
        let mut plans = Vec::with_capacity(books.len());
        let mut tasks: Vec<(String, PathBuf)> = Vec::new();
        for book_dir in books {
            let plan = self
                .plan_book(&book_dir, &store, &journal, &mut report.errors, &mut tasks)
                .await;
            plans.push(plan);
        }

        info!(
            "{} book(s) found, {} unit(s) submitted (concurrency {})",
            plans.len(),
            tasks.len(),
            config.concurrency
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_run_start(tasks.len());
        }

        // ── Step 3: Run chapter pipelines ────────────────────────────────
        let pipeline = ChapterPipeline::new(
            Arc::clone(config),
            self.stages.clone(),
            Arc::clone(&store),
            Arc::clone(&journal),
        );
        report.units = stream::iter(tasks.into_iter().map(|(book, unit)| {
            let pipeline = pipeline.clone();
            async move { pipeline.run(&unit, &book).await }
        }))
        .buffer_unordered(config.concurrency)
        .collect::<Vec<UnitReport>>()
        .await;

        // ── Step 4: Collect finished books ───────────────────────────────
        for plan in plans {
            let book = self.finalize_book(plan, &store, &journal).await;
            report.books.push(book);
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Run finished in {}ms: {} processed, {} skipped, {} failed, {} book(s) complete",
            report.duration_ms,
            report.processed(),
            report.skipped(),
            report.failed(),
            report.completed_books()
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_run_complete(&report);
        }
        Ok(report)
    }

    async fn plan_book(
        &self,
        book_dir: &Path,
        store: &ProgressStore,
        journal: &ErrorJournal,
        errors: &mut Vec<UnitError>,
        tasks: &mut Vec<(String, PathBuf)>,
    ) -> BookPlan {
        let config = &self.config;
        let name = file_name_lossy(book_dir);
        let previously_complete = store.is_complete(&name).await;

        for failure in archive::sweep_staging_dirs(book_dir).await {
            journal
                .record(book_dir, "orchestrator", "leftover extraction not removed", &failure)
                .await;
        }
        let entries = scan_book(config, book_dir).await;
        let units = if previously_complete {
            info!("Book '{}' already complete; nothing to submit", name);
            entries.unit_paths_without_extraction()
        } else {
            self.materialize_units(entries, journal, errors).await
        };
        store.register_book(&name, &units).await;

        let mut plan = BookPlan {
            name,
            path: book_dir.to_path_buf(),
            units,
            submitted: 0,
            stale_cursor: false,
            previously_complete,
        };
        if previously_complete {
            return plan;
        }
        if plan.units.is_empty() {
            info!("Book '{}' has no chapter units", plan.name);
            return plan;
        }

        let cursor = match store.get(&plan.name).await {
            Some(BookProgress::Cursor(path)) => Some(path),
            _ => None,
        };
        let pending: &[PathBuf] = match resume_point(&plan.units, cursor.as_deref()) {
            Resume::FromStart => plan.units.as_slice(),
            Resume::After(rest) => {
                info!(
                    "Book '{}': resuming after '{}' ({} unit(s) left)",
                    plan.name,
                    cursor.as_deref().map(file_name_lossy).unwrap_or_default(),
                    rest.len()
                );
                rest
            }
            Resume::StaleCursor => {
                plan.stale_cursor = true;
                let cursor = cursor.clone().unwrap_or_default();
                let action = match config.stale_cursor {
                    StaleCursorPolicy::Restart => "restarting from the first unit",
                    StaleCursorPolicy::Skip => "skipping the book",
                };
                warn!(
                    "Book '{}': stored cursor '{}' matches no current unit; {}",
                    plan.name,
                    cursor.display(),
                    action
                );
                journal
                    .record(
                        &plan.path,
                        "orchestrator",
                        &format!("stored cursor '{}' matches no current unit", cursor.display()),
                        action,
                    )
                    .await;
                match config.stale_cursor {
                    StaleCursorPolicy::Restart => plan.units.as_slice(),
                    StaleCursorPolicy::Skip => &[],
                }
            }
        };

        plan.submitted = pending.len();
        tasks.extend(pending.iter().map(|u| (plan.name.clone(), u.clone())));
        plan
    }

    /// Turn a book's entries into unit directories, extracting archives
    /// whose companion directory holds no progress yet.
    async fn materialize_units(
        &self,
        entries: BookEntries,
        journal: &ErrorJournal,
        errors: &mut Vec<UnitError>,
    ) -> Vec<PathBuf> {
        let folders = &self.config.folders;
        let mut units = entries.dirs;
        for archive_path in entries.archives {
            let companion = archive::companion_dir(&archive_path, &entries.book_dir, UNZIPPED_SUFFIX);
            let final_dir = entries.book_dir.join(&folders.final_texts);
            let reusable = match inspect_unit(&companion, &final_dir, folders).await {
                Ok(stage) => stage != UnitStage::NotStarted,
                Err(e) => {
                    warn!("Cannot inspect '{}': {}", companion.display(), e);
                    false
                }
            };
            if reusable {
                debug!("Reusing '{}' without re-extracting", companion.display());
                units.push(companion);
                continue;
            }
            match archive::extract_archive(&archive_path, &entries.book_dir, UNZIPPED_SUFFIX).await {
                Ok(unit) => units.push(unit),
                Err(e) => {
                    error!("Skipping archive '{}': {}", archive_path.display(), e);
                    journal.record_unit_error(&archive_path, &e).await;
                    errors.push(e);
                }
            }
        }
        sort_paths_natural(&mut units);
        units
    }

    async fn finalize_book(
        &self,
        plan: BookPlan,
        store: &ProgressStore,
        journal: &ErrorJournal,
    ) -> BookReport {
        let config = &self.config;
        let final_dir = plan.path.join(&config.folders.final_texts);
        let total = plan.units.len();

        let status = if total == 0 {
            BookStatus::Empty
        } else {
            let mut ready = 0usize;
            for unit in &plan.units {
                match inspect_unit(unit, &final_dir, &config.folders).await {
                    Ok(stage) if stage.is_done() => ready += 1,
                    Ok(_) => {}
                    Err(e) => warn!("Cannot inspect '{}': {}", unit.display(), e),
                }
            }

            if plan.previously_complete || ready == total {
                self.collect_book(&plan, &final_dir, store, journal).await
            } else {
                warn!(
                    "Book '{}' incomplete: {}/{} unit(s) ready; final collection postponed",
                    plan.name, ready, total
                );
                BookStatus::Incomplete { ready, total }
            }
        };

        info!("Book '{}': {}", plan.name, status);
        BookReport {
            name: plan.name,
            path: plan.path,
            units: total,
            submitted: plan.submitted,
            stale_cursor: plan.stale_cursor,
            status,
        }
    }

    /// Copy cleaned texts into the final folder, remove intermediates and
    /// mark the book complete.
    async fn collect_book(
        &self,
        plan: &BookPlan,
        final_dir: &Path,
        store: &ProgressStore,
        journal: &ErrorJournal,
    ) -> BookStatus {
        let config = &self.config;
        let mut failures = Vec::new();

        if let Err(e) = tokio::fs::create_dir_all(final_dir).await {
            failures.push(format!("cannot create '{}': {}", final_dir.display(), e));
        }

        let mut collected = 0usize;
        if failures.is_empty() {
            for unit in &plan.units {
                let texts = match list_text_files(&unit.join(&config.folders.cleaned)).await {
                    Ok(texts) => texts,
                    Err(e) => {
                        failures.push(e.to_string());
                        continue;
                    }
                };
                for text in texts {
                    let target = final_dir.join(file_name_lossy(&text));
                    match tokio::fs::copy(&text, &target).await {
                        Ok(_) => {
                            debug!("Collected '{}'", target.display());
                            collected += 1;
                        }
                        Err(e) => failures.push(format!("copy '{}': {}", text.display(), e)),
                    }
                }
            }
        }

        if failures.is_empty() {
            for unit in &plan.units {
                let extracted = file_name_lossy(unit).ends_with(UNZIPPED_SUFFIX);
                failures.extend(purge_unit_intermediates(unit, &config.folders, extracted).await);
            }
        }

        if failures.is_empty() {
            if let Err(e) = store.mark_book_complete(&plan.name).await {
                journal.record_unit_error(&plan.path, &e).await;
                failures.push(e.to_string());
            }
        }

        if !failures.is_empty() {
            let detail = failures.join("; ");
            error!("Book '{}' not marked complete: {}", plan.name, detail);
            journal
                .record(&plan.path, "collect", "final collection failed", &detail)
                .await;
            return BookStatus::CollectionFailed { detail };
        }

        if let Some(ref cb) = config.progress_callback {
            cb.on_book_complete(&plan.name, collected);
        }
        BookStatus::Completed {
            collected,
            previously_complete: plan.previously_complete,
        }
    }
}

/// Process every book under `config.root_dir`.
pub async fn run(config: &PipelineConfig) -> Result<RunReport, ScanbookError> {
    Orchestrator::new(config.clone()).run().await
}

/// Synchronous wrapper around [`run`].
///
/// Creates a temporary multi-threaded Tokio runtime. Do not call from within
/// an existing async context.
pub fn run_sync(config: &PipelineConfig) -> Result<RunReport, ScanbookError> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| ScanbookError::Internal(format!("Failed to create runtime: {e}")))?;
    rt.block_on(run(config))
}

async fn log_resume_points(store: &ProgressStore) {
    let records = store.snapshot().await;
    if records.is_empty() {
        info!("No previous progress recorded");
        return;
    }
    info!("Loaded progress for {} book(s):", records.len());
    for (book, progress) in records {
        match progress {
            BookProgress::Complete => info!("  {}: complete", book),
            BookProgress::Cursor(path) => info!("  {}: after '{}'", book, file_name_lossy(&path)),
        }
    }
}

// ── Discovery ────────────────────────────────────────────────────────────────

/// Book directories under the root, in natural order.
pub async fn list_books(config: &PipelineConfig) -> Result<Vec<PathBuf>, ScanbookError> {
    let root = &config.root_dir;
    let unreadable = |source| ScanbookError::RootUnreadable {
        path: root.clone(),
        source,
    };
    let mut dir = tokio::fs::read_dir(root).await.map_err(unreadable)?;

    let mut books = Vec::new();
    while let Some(entry) = dir.next_entry().await.map_err(unreadable)? {
        let path = entry.path();
        let name = file_name_lossy(&path);
        if name.starts_with('.') || !path.is_dir() {
            continue;
        }
        if config.is_excluded(&name) {
            debug!("Skipping excluded directory '{}'", name);
            continue;
        }
        books.push(path);
    }
    sort_paths_natural(&mut books);
    Ok(books)
}

/// Raw contents of a book directory.
#[derive(Debug, Default)]
pub(crate) struct BookEntries {
    pub(crate) book_dir: PathBuf,
    /// Unit directories, without companions of archives in `archives`.
    pub(crate) dirs: Vec<PathBuf>,
    /// Chapter archives.
    pub(crate) archives: Vec<PathBuf>,
}

impl BookEntries {
    /// Unit paths with archives mapped to their companion directories.
    pub(crate) fn unit_paths_without_extraction(self) -> Vec<PathBuf> {
        let mut units = self.dirs;
        units.extend(
            self.archives
                .iter()
                .map(|a| archive::companion_dir(a, &self.book_dir, UNZIPPED_SUFFIX)),
        );
        sort_paths_natural(&mut units);
        units
    }
}

/// List the unit directories and archives of `book_dir`.
///
/// An unreadable book directory is logged and treated as empty.
pub(crate) async fn scan_book(config: &PipelineConfig, book_dir: &Path) -> BookEntries {
    let mut entries = BookEntries {
        book_dir: book_dir.to_path_buf(),
        ..Default::default()
    };
    let mut dir = match tokio::fs::read_dir(book_dir).await {
        Ok(d) => d,
        Err(e) => {
            warn!("Cannot list book '{}': {}", book_dir.display(), e);
            return entries;
        }
    };

    loop {
        let entry = match dir.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Error while listing '{}': {}", book_dir.display(), e);
                break;
            }
        };
        let path = entry.path();
        let name = file_name_lossy(&path);
        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            if config.is_reserved_unit_name(&name) {
                continue;
            }
            entries.dirs.push(path);
        } else if archive::is_chapter_archive(&path) {
            entries.archives.push(path);
        }
    }

    let companions: HashSet<PathBuf> = entries
        .archives
        .iter()
        .map(|a| archive::companion_dir(a, book_dir, UNZIPPED_SUFFIX))
        .collect();
    entries.dirs.retain(|d| !companions.contains(d));
    sort_paths_natural(&mut entries.dirs);
    sort_paths_natural(&mut entries.archives);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_for(root: &Path) -> PipelineConfig {
        PipelineConfig::builder().root_dir(root).build().unwrap()
    }

    #[tokio::test]
    async fn books_skip_files_hidden_and_excluded() {
        let root = tempfile::tempdir().unwrap();
        for d in ["Book 10", "Book 2", "Backup", ".git"] {
            fs::create_dir_all(root.path().join(d)).unwrap();
        }
        fs::write(root.path().join("notes.txt"), "").unwrap();

        let books = list_books(&config_for(root.path())).await.unwrap();
        let names: Vec<String> = books.iter().map(|b| file_name_lossy(b)).collect();
        assert_eq!(names, vec!["Book 2", "Book 10"]);
    }

    #[tokio::test]
    async fn missing_root_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let err = list_books(&config_for(&root.path().join("nope")))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanbookError::RootUnreadable { .. }));
    }

    #[tokio::test]
    async fn scan_dedupes_archive_companions() {
        let root = tempfile::tempdir().unwrap();
        let book = root.path().join("Book");
        for d in ["Chapter 1", "Chapter 2_unzipped", "Chapter 3_unzipped", "final_texts", "sortieTXT"] {
            fs::create_dir_all(book.join(d)).unwrap();
        }
        fs::write(book.join("Chapter 2.cbz"), "").unwrap();

        let entries = scan_book(&config_for(root.path()), &book).await;
        let dirs: Vec<String> = entries.dirs.iter().map(|d| file_name_lossy(d)).collect();
        assert_eq!(dirs, vec!["Chapter 1", "Chapter 3_unzipped"]);
        assert_eq!(entries.archives, vec![book.join("Chapter 2.cbz")]);

        let units: Vec<String> = entries
            .unit_paths_without_extraction()
            .iter()
            .map(|u| file_name_lossy(u))
            .collect();
        assert_eq!(units, vec!["Chapter 1", "Chapter 2_unzipped", "Chapter 3_unzipped"]);
    }
}
