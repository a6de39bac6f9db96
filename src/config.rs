//! Configuration types for a scanbook run.
//!
//! All orchestrator behaviour is controlled through [`PipelineConfig`], built
//! once at process start via [`PipelineConfigBuilder`] and then handed by
//! reference to every component. Nothing in the library reads ambient global
//! state; two runs with equal configs over equal trees behave identically.

use crate::error::ScanbookError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default names of directories that are never treated as books or units.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "backup",
    "temp",
    "script",
    "scripts",
    "output",
    "__pycache__",
    "traiter",
    "a traiter",
    "sortie",
];

/// Configuration for a scanbook run.
///
/// # Example
/// ```rust
/// use scanbook::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .root_dir("/data/novels")
///     .concurrency(4)
///     .ocr_language("jpn")
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 4);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Directory whose subdirectories are books.
    pub root_dir: PathBuf,

    /// Progress file. Default: `<root>/processed_chapters.progress`.
    pub progress_file: Option<PathBuf>,

    /// Orchestrator log file. Default: `<root>/orchestrator_log.log`.
    pub log_file: Option<PathBuf>,

    /// Global error journal. Default: `<root>/global_errors.log`.
    pub error_log_file: Option<PathBuf>,

    /// Tesseract language code passed to the OCR stage. Default: `eng`.
    pub ocr_language: String,

    /// Tesseract executable used by the default OCR stage. Default: `tesseract`.
    pub tesseract_bin: String,

    /// Pages taller than this many pixels are cut into segments. Default: 10 000.
    pub max_image_height: u32,

    /// Names of the per-unit and per-book pipeline folders.
    pub folders: FolderNames,

    /// Lower-cased directory names skipped at book and unit level.
    pub excluded_dirs: BTreeSet<String>,

    /// Chapter units processed at the same time. Default: 4.
    pub concurrency: usize,

    /// Upper bound for a single stage invocation, in seconds. 0 disables it.
    /// Default: 3600.
    pub stage_timeout_secs: u64,

    /// Implementation of the split stage.
    pub split: StageSpec,

    /// Implementation of the OCR stage.
    pub ocr: StageSpec,

    /// Implementation of the clean stage.
    pub clean: StageSpec,

    /// What to do when a stored cursor names a unit that no longer exists.
    pub stale_cursor: StaleCursorPolicy,

    /// Receives per-unit and per-book events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::new(),
            progress_file: None,
            log_file: None,
            error_log_file: None,
            ocr_language: "eng".to_string(),
            tesseract_bin: "tesseract".to_string(),
            max_image_height: 10_000,
            folders: FolderNames::default(),
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
            concurrency: 4,
            stage_timeout_secs: 3600,
            split: StageSpec::Builtin,
            ocr: StageSpec::Builtin,
            clean: StageSpec::Builtin,
            stale_cursor: StaleCursorPolicy::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("root_dir", &self.root_dir)
            .field("progress_file", &self.progress_path())
            .field("ocr_language", &self.ocr_language)
            .field("max_image_height", &self.max_image_height)
            .field("folders", &self.folders)
            .field("excluded_dirs", &self.excluded_dirs)
            .field("concurrency", &self.concurrency)
            .field("stage_timeout_secs", &self.stage_timeout_secs)
            .field("split", &self.split)
            .field("ocr", &self.ocr)
            .field("clean", &self.clean)
            .field("stale_cursor", &self.stale_cursor)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn progress_path(&self) -> PathBuf {
        self.progress_file
            .clone()
            .unwrap_or_else(|| self.root_dir.join("processed_chapters.progress"))
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.root_dir.join("orchestrator_log.log"))
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.error_log_file
            .clone()
            .unwrap_or_else(|| self.root_dir.join("global_errors.log"))
    }

    /// `None` when stage invocations are unbounded.
    pub fn stage_timeout(&self) -> Option<Duration> {
        (self.stage_timeout_secs > 0).then(|| Duration::from_secs(self.stage_timeout_secs))
    }

    /// True if `name` is an excluded directory name (case-insensitive).
    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded_dirs.contains(&name.to_lowercase())
    }

    /// True if `name` is excluded or one of the pipeline's own folders, i.e.
    /// a directory inside a book that is not a chapter unit.
    pub fn is_reserved_unit_name(&self, name: &str) -> bool {
        self.is_excluded(name) || self.folders.contains(name)
    }

    /// The final-texts directory of the book containing `unit`.
    pub fn final_dir_for(&self, unit: &Path) -> PathBuf {
        unit.parent()
            .unwrap_or_else(|| Path::new(""))
            .join(&self.folders.final_texts)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.root_dir = dir.into();
        self
    }

    pub fn progress_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.progress_file = Some(path.into());
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_file = Some(path.into());
        self
    }

    pub fn error_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.error_log_file = Some(path.into());
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn tesseract_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.tesseract_bin = bin.into();
        self
    }

    pub fn max_image_height(mut self, px: u32) -> Self {
        self.config.max_image_height = px.max(1);
        self
    }

    pub fn folders(mut self, folders: FolderNames) -> Self {
        self.config.folders = folders;
        self
    }

    /// Replace the excluded directory names.
    pub fn excluded_dirs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.excluded_dirs = names
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    /// Add one excluded directory name to the current set.
    pub fn exclude_dir(mut self, name: impl AsRef<str>) -> Self {
        let name = name.as_ref().trim().to_lowercase();
        if !name.is_empty() {
            self.config.excluded_dirs.insert(name);
        }
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn stage_timeout_secs(mut self, secs: u64) -> Self {
        self.config.stage_timeout_secs = secs;
        self
    }

    pub fn split_stage(mut self, spec: StageSpec) -> Self {
        self.config.split = spec;
        self
    }

    pub fn ocr_stage(mut self, spec: StageSpec) -> Self {
        self.config.ocr = spec;
        self
    }

    pub fn clean_stage(mut self, spec: StageSpec) -> Self {
        self.config.clean = spec;
        self
    }

    pub fn stale_cursor(mut self, policy: StaleCursorPolicy) -> Self {
        self.config.stale_cursor = policy;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ScanbookError> {
        let c = &self.config;
        if c.root_dir.as_os_str().is_empty() {
            return Err(ScanbookError::InvalidConfig(
                "a books root directory is required".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(ScanbookError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.ocr_language.trim().is_empty() {
            return Err(ScanbookError::InvalidConfig(
                "OCR language must not be empty".into(),
            ));
        }
        c.folders.validate()?;
        for spec in [&c.split, &c.ocr, &c.clean] {
            if let StageSpec::Command { program, .. } = spec {
                if program.trim().is_empty() {
                    return Err(ScanbookError::InvalidConfig(
                        "stage command must name a program".into(),
                    ));
                }
            }
        }
        Ok(self.config)
    }
}

// ── Supporting types ─────────────────────────────────────────────────────

/// Names of the pipeline's working folders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderNames {
    /// Split stage output, inside each unit.
    pub split: String,
    /// Raw OCR text, inside each unit.
    pub ocr: String,
    /// Cleaned text, inside each unit.
    pub cleaned: String,
    /// Collected final texts, inside each book.
    pub final_texts: String,
}

impl Default for FolderNames {
    fn default() -> Self {
        Self {
            split: "images_processed".to_string(),
            ocr: "sortieTXT".to_string(),
            cleaned: "sortieTXT_cleaned".to_string(),
            final_texts: "final_texts".to_string(),
        }
    }
}

impl FolderNames {
    /// Case-insensitive membership test.
    pub fn contains(&self, name: &str) -> bool {
        [&self.split, &self.ocr, &self.cleaned, &self.final_texts]
            .iter()
            .any(|f| f.eq_ignore_ascii_case(name))
    }

    fn validate(&self) -> Result<(), ScanbookError> {
        let names = [&self.split, &self.ocr, &self.cleaned, &self.final_texts];
        for name in names {
            if name.trim().is_empty() || name.contains(['/', '\\']) {
                return Err(ScanbookError::InvalidConfig(format!(
                    "invalid folder name '{name}'"
                )));
            }
        }
        let unique: BTreeSet<String> = names.iter().map(|n| n.to_lowercase()).collect();
        if unique.len() != names.len() {
            return Err(ScanbookError::InvalidConfig(
                "the four pipeline folder names must be distinct".into(),
            ));
        }
        Ok(())
    }
}

/// Which implementation backs a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageSpec {
    /// The implementation shipped with this crate. (default)
    #[default]
    Builtin,
    /// An external program; the unit directory is appended as last argument.
    Command { program: String, args: Vec<String> },
}

impl StageSpec {
    /// Parse a whitespace-separated command line such as
    /// `"python3 split.py --chapter_unit"`. Empty input yields `Builtin`.
    pub fn from_command_line(line: &str) -> Self {
        let mut parts = line.split_whitespace().map(str::to_string);
        match parts.next() {
            Some(program) => StageSpec::Command {
                program,
                args: parts.collect(),
            },
            None => StageSpec::Builtin,
        }
    }
}

/// Policy for a resume cursor that matches none of a book's current units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StaleCursorPolicy {
    /// Resubmit every unit of the book. Finished units are detected on disk
    /// and skipped without running a stage. (default)
    #[default]
    Restart,
    /// Submit nothing for the book until the cursor is fixed by hand.
    Skip,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_root() {
        let err = PipelineConfig::builder().build().unwrap_err();
        assert!(err.to_string().contains("root"));
    }

    #[test]
    fn default_paths_live_under_root() {
        let config = PipelineConfig::builder().root_dir("/books").build().unwrap();
        assert_eq!(
            config.progress_path(),
            PathBuf::from("/books/processed_chapters.progress")
        );
        assert_eq!(config.log_path(), PathBuf::from("/books/orchestrator_log.log"));
        assert_eq!(config.error_log_path(), PathBuf::from("/books/global_errors.log"));
    }

    #[test]
    fn concurrency_is_clamped() {
        let config = PipelineConfig::builder()
            .root_dir("/books")
            .concurrency(0)
            .build()
            .unwrap();
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn zero_timeout_disables_it() {
        let config = PipelineConfig::builder()
            .root_dir("/books")
            .stage_timeout_secs(0)
            .build()
            .unwrap();
        assert!(config.stage_timeout().is_none());
    }

    #[test]
    fn exclusions_are_case_insensitive() {
        let config = PipelineConfig::builder()
            .root_dir("/books")
            .excluded_dirs(["Backup", " Drafts "])
            .build()
            .unwrap();
        assert!(config.is_excluded("BACKUP"));
        assert!(config.is_excluded("drafts"));
        assert!(!config.is_excluded("temp"));
        assert!(config.is_reserved_unit_name("SortieTXT"));
    }

    #[test]
    fn default_exclusions_cover_working_folders() {
        let config = PipelineConfig::builder().root_dir("/books").build().unwrap();
        for name in ["Traiter", "A traiter", "SORTIE", "scripts", "__pycache__"] {
            assert!(config.is_excluded(name), "{name}");
        }
        assert!(!config.is_excluded("One Piece"));
    }

    #[test]
    fn duplicate_folder_names_rejected() {
        let folders = FolderNames {
            cleaned: "sortieTXT".into(),
            ..FolderNames::default()
        };
        let err = PipelineConfig::builder()
            .root_dir("/books")
            .folders(folders)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("distinct"));
    }

    #[test]
    fn stage_spec_from_command_line() {
        assert_eq!(StageSpec::from_command_line("   "), StageSpec::Builtin);
        assert_eq!(
            StageSpec::from_command_line("python3 ocr.py --chapter_unit"),
            StageSpec::Command {
                program: "python3".into(),
                args: vec!["ocr.py".into(), "--chapter_unit".into()],
            }
        );
    }

    #[test]
    fn final_dir_is_sibling_of_unit() {
        let config = PipelineConfig::builder().root_dir("/books").build().unwrap();
        assert_eq!(
            config.final_dir_for(Path::new("/books/B/Chapter 1")),
            PathBuf::from("/books/B/final_texts")
        );
    }
}
