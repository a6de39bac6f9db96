//! CLI binary for scanbook.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig`, installs logging and prints the run report.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use scanbook::{
    inspect_library, purge_intermediates, run, BookStatusView, FolderNames, PipelineConfig,
    PipelineProgressCallback, ProgressCallback, RunReport, StageSpec, StaleCursorPolicy,
    UnitOutcome,
};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished chapter. Units finish
/// out of order, so start times are keyed by unit path.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<PathBuf, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner-only until `on_run_start` reports the number of units.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Scanning library…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} chapters  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Processing");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, unit: &Path) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(unit))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

fn unit_label(book: &str, unit: &Path) -> String {
    let name = unit
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| unit.display().to_string());
    format!("{book} / {name}")
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_units: usize) {
        self.activate_bar(total_units);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_units} chapter(s) to process…"))
        ));
    }

    fn on_unit_start(&self, _book: &str, unit: &Path) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(unit.to_path_buf(), Instant::now());
        }
        if let Some(name) = unit.file_name() {
            self.bar.set_message(name.to_string_lossy().into_owned());
        }
    }

    fn on_unit_complete(&self, book: &str, unit: &Path, outcome: &UnitOutcome) {
        let secs = self.elapsed_secs(unit);
        let mark = match outcome {
            UnitOutcome::Skipped { .. } => dim("·"),
            _ => green("✓"),
        };
        self.bar.println(format!(
            "  {}  {:<48}  {}  {}",
            mark,
            unit_label(book, unit),
            dim(&outcome.to_string()),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_unit_error(&self, book: &str, unit: &Path, error: &str) {
        let secs = self.elapsed_secs(unit);
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Keep one line per chapter.
        let msg: String = if error.chars().count() > 80 {
            let mut s: String = error.chars().take(79).collect();
            s.push('…');
            s
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {}  {:<48}  {}  {}",
            red("✗"),
            unit_label(book, unit),
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_book_complete(&self, book: &str, collected: usize) {
        self.bar.println(format!(
            "{} {}  {}",
            green("■"),
            bold(book),
            dim(&format!("{collected} final text(s)"))
        ));
    }

    fn on_run_complete(&self, report: &RunReport) {
        self.bar.finish_and_clear();
        let total = report.units.len();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} chapter(s) done",
                green("✔"),
                bold(&total.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} chapter(s) done  ({} failed)",
                if failed == total { red("✘") } else { yellow("⚠") },
                bold(&total.saturating_sub(failed).to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process every book under a library root
  scanbook /data/manga

  # Japanese OCR, eight chapters at a time
  scanbook --ocr-language jpn -c 8 /data/manga

  # Use external stage programs (the unit directory is appended)
  scanbook --split-cmd "python3 split.py" --clean-cmd "python3 clean.py" /data/manga

  # Show what is done without touching anything
  scanbook --inspect-only /data/manga

  # Remove intermediate folders and extracted archives
  scanbook --cleanup-only --delete-unzipped /data/manga

  # Machine-readable run report
  scanbook --json /data/manga > report.json

LAYOUT:
  <root>/<book>/<chapter>/            chapter unit (pages 1.png, 2.png, …)
  <root>/<book>/<chapter>.cbz         chapter archive, extracted to <chapter>_unzipped/
  <root>/<book>/final_texts/          collected chapter texts
  <root>/processed_chapters.progress  resume points
  <root>/orchestrator_log.log         run log
  <root>/global_errors.log            per-chapter error journal

ENVIRONMENT VARIABLES:
  SCANBOOK_*   Every flag has a SCANBOOK_<FLAG> fallback (see --help)
  RUST_LOG     Override the log filter (e.g. scanbook=debug)
"#;

/// Resumable OCR pipeline for scanned comic and manga chapters.
#[derive(Parser, Debug)]
#[command(
    name = "scanbook",
    version,
    about = "Turn folders of scanned comic chapters into cleaned chapter text files",
    long_about = "Walks a library of books, splits tall chapter pages, runs tesseract OCR, \
cleans the text and collects one text file per chapter into each book's final folder. \
Interrupted runs resume where they stopped.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Library root: every subdirectory is a book.
    root: PathBuf,

    /// Progress file (default: <root>/processed_chapters.progress).
    #[arg(long, env = "SCANBOOK_PROGRESS_FILE")]
    progress_file: Option<PathBuf>,

    /// Orchestrator log file (default: <root>/orchestrator_log.log).
    #[arg(long, env = "SCANBOOK_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Global error journal (default: <root>/global_errors.log).
    #[arg(long, env = "SCANBOOK_ERROR_LOG")]
    error_log: Option<PathBuf>,

    /// Number of chapters processed at the same time.
    #[arg(short, long, env = "SCANBOOK_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Tesseract language code (e.g. eng, jpn, fra+eng).
    #[arg(long, env = "SCANBOOK_OCR_LANGUAGE", default_value = "eng")]
    ocr_language: String,

    /// Pages taller than this many pixels are cut into segments.
    #[arg(long, env = "SCANBOOK_MAX_IMAGE_HEIGHT", default_value_t = 10_000,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_image_height: u32,

    /// Extra directory names to skip (comma-separated, case-insensitive).
    #[arg(long, env = "SCANBOOK_EXCLUDE", value_delimiter = ',')]
    exclude: Vec<String>,

    /// Per-stage timeout in seconds (0 = unbounded).
    #[arg(long, env = "SCANBOOK_STAGE_TIMEOUT", default_value_t = 3600)]
    stage_timeout: u64,

    /// External split command; the unit directory is appended.
    #[arg(long, env = "SCANBOOK_SPLIT_CMD")]
    split_cmd: Option<String>,

    /// External OCR command; the unit directory is appended.
    #[arg(long, env = "SCANBOOK_OCR_CMD")]
    ocr_cmd: Option<String>,

    /// External clean command; the unit directory is appended.
    #[arg(long, env = "SCANBOOK_CLEAN_CMD")]
    clean_cmd: Option<String>,

    /// Tesseract executable used by the built-in OCR stage.
    #[arg(long, env = "SCANBOOK_TESSERACT", default_value = "tesseract")]
    tesseract: String,

    /// What to do when a stored cursor matches no current chapter.
    #[arg(long, env = "SCANBOOK_ON_STALE_CURSOR", value_enum, default_value = "restart")]
    on_stale_cursor: StaleArg,

    /// Split stage output folder, inside each chapter.
    #[arg(long, env = "SCANBOOK_SPLIT_DIR", default_value = "images_processed")]
    split_dir: String,

    /// Raw OCR folder, inside each chapter.
    #[arg(long, env = "SCANBOOK_OCR_DIR", default_value = "sortieTXT")]
    ocr_dir: String,

    /// Cleaned text folder, inside each chapter.
    #[arg(long, env = "SCANBOOK_CLEANED_DIR", default_value = "sortieTXT_cleaned")]
    cleaned_dir: String,

    /// Collected texts folder, inside each book.
    #[arg(long, env = "SCANBOOK_FINAL_DIR", default_value = "final_texts")]
    final_dir: String,

    /// Print the status of every book and chapter, change nothing.
    #[arg(long, conflicts_with = "cleanup_only")]
    inspect_only: bool,

    /// Remove intermediate folders, run no stage.
    #[arg(long)]
    cleanup_only: bool,

    /// With --cleanup-only: also delete extracted `*_unzipped` chapters.
    #[arg(long, requires = "cleanup_only")]
    delete_unzipped: bool,

    /// Print the report as JSON on stdout.
    #[arg(long, env = "SCANBOOK_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SCANBOOK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SCANBOOK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SCANBOOK_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StaleArg {
    Restart,
    Skip,
}

impl From<StaleArg> for StaleCursorPolicy {
    fn from(v: StaleArg) -> Self {
        match v {
            StaleArg::Restart => StaleCursorPolicy::Restart,
            StaleArg::Skip => StaleCursorPolicy::Skip,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let maintenance = cli.inspect_only || cli.cleanup_only;

    // ── Build config ─────────────────────────────────────────────────────
    let show_progress = !maintenance && !cli.quiet && !cli.no_progress && !cli.json;
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO lines on stderr; the log file keeps them.
    let level = if cli.verbose { "debug" } else { "info" };
    let stderr_level = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    let log_file = if maintenance {
        None
    } else {
        let path = config.log_path();
        let file = File::create(&path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        Some(file)
    };
    install_logging(stderr_level, level, log_file);

    // ── Maintenance modes ────────────────────────────────────────────────
    if cli.inspect_only {
        let books = inspect_library(&config)
            .await
            .context("Failed to inspect library")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&books).context("Failed to serialise status")?
            );
        } else {
            print_library(&books);
        }
        return Ok(ExitCode::SUCCESS);
    }

    if cli.cleanup_only {
        let report = purge_intermediates(&config, cli.delete_unzipped)
            .await
            .context("Cleanup failed")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        } else if !cli.quiet {
            eprintln!(
                "{} cleaned {} book(s), {} chapter(s)",
                if report.failures.is_empty() { green("✔") } else { yellow("⚠") },
                report.books,
                report.units
            );
            for failure in &report.failures {
                eprintln!("  {} {}", red("✗"), failure);
            }
        }
        return Ok(if report.failures.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    // ── Run pipeline ─────────────────────────────────────────────────────
    let report = run(&config).await.context("Pipeline failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        print_summary(&report, !show_progress);
    }

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Stderr layer plus, for pipeline runs, a plain-text file layer.
fn install_logging(stderr_level: &str, file_level: &str, file: Option<File>) {
    let stderr_layer = fmt::layer().with_writer(io::stderr).with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(stderr_level)),
    );
    let file_layer = file.map(|f| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(f))
            .with_filter(EnvFilter::new(file_level))
    });
    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let root = std::fs::canonicalize(&cli.root)
        .with_context(|| format!("Library root {} is not accessible", cli.root.display()))?;

    let folders = FolderNames {
        split: cli.split_dir.clone(),
        ocr: cli.ocr_dir.clone(),
        cleaned: cli.cleaned_dir.clone(),
        final_texts: cli.final_dir.clone(),
    };

    let mut builder = PipelineConfig::builder()
        .root_dir(root)
        .ocr_language(&cli.ocr_language)
        .tesseract_bin(&cli.tesseract)
        .max_image_height(cli.max_image_height)
        .folders(folders)
        .concurrency(cli.concurrency)
        .stage_timeout_secs(cli.stage_timeout)
        .stale_cursor(cli.on_stale_cursor.into());

    for name in cli.exclude.iter().filter(|n| !n.trim().is_empty()) {
        builder = builder.exclude_dir(name.trim());
    }
    if let Some(ref path) = cli.progress_file {
        builder = builder.progress_file(path);
    }
    if let Some(ref path) = cli.log_file {
        builder = builder.log_file(path);
    }
    if let Some(ref path) = cli.error_log {
        builder = builder.error_log_file(path);
    }
    if let Some(ref line) = cli.split_cmd {
        builder = builder.split_stage(StageSpec::from_command_line(line));
    }
    if let Some(ref line) = cli.ocr_cmd {
        builder = builder.ocr_stage(StageSpec::from_command_line(line));
    }
    if let Some(ref line) = cli.clean_cmd {
        builder = builder.clean_stage(StageSpec::from_command_line(line));
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_library(books: &[BookStatusView]) {
    for book in books {
        let state = if book.complete {
            green("complete")
        } else {
            format!("{}/{} ready", book.ready(), book.units.len())
        };
        println!("{}  {}", bold(&book.name), state);
        if let Some(ref cursor) = book.cursor {
            println!("   cursor: {}", dim(&cursor.display().to_string()));
        }
        for unit in &book.units {
            let name = unit
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let extra = if unit.pending_extraction {
                dim("  (archive not extracted)")
            } else {
                String::new()
            };
            println!("   {:<40} {}{}", name, unit.stage, extra);
        }
    }
}

fn print_summary(report: &RunReport, with_units: bool) {
    if with_units {
        eprintln!(
            "Processed {}, skipped {}, failed {} chapter(s) in {}ms",
            report.processed(),
            report.skipped(),
            report.failed(),
            report.duration_ms
        );
    }
    for book in &report.books {
        eprintln!("   {}  {}", bold(&book.name), dim(&book.status.to_string()));
    }
    for error in &report.errors {
        eprintln!("   {} {}", red("✗"), error);
    }
    eprintln!(
        "{}  {} book(s) complete, {}ms total",
        if report.has_failures() { yellow("⚠") } else { green("✔") },
        report.completed_books(),
        report.duration_ms,
    );
}
