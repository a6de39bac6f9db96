//! Built-in clean stage: deterministic cleanup of raw OCR text.
//!
//! OCR output of scanned comic pages is noisy in predictable ways: words cut
//! at line ends, runs of blank lines, spaces before punctuation, padding
//! inside brackets, and error markers for segments the engine rejected. The
//! rules below repair those artefacts without touching wording.
//!
//! ## Rule Order
//!
//! Rules run in a fixed order. Whitespace is collapsed before lines are
//! trimmed, and lines are trimmed before wrapped words are joined, so the
//! joining rule sees each line break with its neighbours already tidy.
//! Form feeds become paragraph breaks last, after the joining rule, so page
//! boundaries survive.

use super::{Stage, StageKind, StageLog};
use crate::config::FolderNames;
use crate::error::UnitError;
use crate::inspect::text_files;
use crate::naming::file_name_lossy;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Apply all cleanup rules to raw OCR text.
///
/// Rules (applied in order):
/// 1. Drop "Image too large" segment error markers
/// 2. Collapse 3+ newlines to a single blank line
/// 3. Collapse runs of spaces, tabs and NBSP to one space
/// 4. Trim spaces and tabs at both ends of every line
/// 5. Join lines broken inside a word, removing a trailing hyphen
/// 6. Turn a line break followed by a dash into a space
/// 7. Remove whitespace before `, . ! ? ; :`
/// 8. Remove whitespace after opening brackets
/// 9. Remove whitespace before closing brackets
/// 10. Form feeds become blank lines, then the whole text is trimmed
pub fn clean_text(input: &str) -> String {
    let s = remove_oversize_markers(input);
    let s = collapse_newlines(&s);
    let s = collapse_spaces(&s);
    let s = trim_lines(&s);
    let s = join_wrapped_lines(&s);
    let s = dash_continuations(&s);
    let s = tighten_punctuation(&s);
    let s = tighten_brackets(&s);
    form_feeds_to_paragraphs(&s).trim().to_string()
}

// ── Rule 1: Drop oversize segment markers ───────────────────────────────────

static RE_OVERSIZE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[OCR ERROR ON SEGMENT [^\]]*?Image too large[^\]]*\]\n\n").unwrap()
});

fn remove_oversize_markers(input: &str) -> String {
    RE_OVERSIZE_MARKER.replace_all(input, "").into_owned()
}

// ── Rule 2: Collapse blank lines ────────────────────────────────────────────

static RE_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_newlines(input: &str) -> String {
    RE_NEWLINES.replace_all(input, "\n\n").into_owned()
}

// ── Rule 3: Collapse horizontal whitespace ──────────────────────────────────

static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{A0}]+").unwrap());

fn collapse_spaces(input: &str) -> String {
    RE_SPACES.replace_all(input, " ").into_owned()
}

// ── Rule 4: Trim lines ──────────────────────────────────────────────────────

static RE_LINE_PADDING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]+|[ \t]+$").unwrap());

fn trim_lines(input: &str) -> String {
    RE_LINE_PADDING.replace_all(input, "").into_owned()
}

// ── Rule 5: Join wrapped lines ──────────────────────────────────────────────
//
// A break (optionally preceded by a hyphen) is removed only when a word
// character sits directly on both sides. The regex crate has no look-around,
// so the neighbours are checked by hand for every candidate break.

static RE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\s*\n\s*").unwrap());

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn join_wrapped_lines(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for m in RE_BREAK.find_iter(input) {
        let before = input[..m.start()].chars().next_back();
        let after = input[m.end()..].chars().next();
        if before.is_some_and(is_word_char) && after.is_some_and(is_word_char) {
            out.push_str(&input[last..m.start()]);
            last = m.end();
        }
    }
    out.push_str(&input[last..]);
    out
}

// ── Rule 6: Dash continuations ──────────────────────────────────────────────

static RE_DASH_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n-\s*").unwrap());

fn dash_continuations(input: &str) -> String {
    RE_DASH_LINE.replace_all(input, " ").into_owned()
}

// ── Rule 7: Punctuation spacing ─────────────────────────────────────────────

static RE_SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+([,.!?;:])").unwrap());

fn tighten_punctuation(input: &str) -> String {
    RE_SPACE_BEFORE_PUNCT.replace_all(input, "$1").into_owned()
}

// ── Rules 8–9: Bracket padding ──────────────────────────────────────────────

static RE_AFTER_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"([(\[{])\s+").unwrap());
static RE_BEFORE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+([)\]}])").unwrap());

fn tighten_brackets(input: &str) -> String {
    let s = RE_AFTER_OPEN.replace_all(input, "$1");
    RE_BEFORE_CLOSE.replace_all(&s, "$1").into_owned()
}

// ── Rule 10: Form feeds ─────────────────────────────────────────────────────

fn form_feeds_to_paragraphs(input: &str) -> String {
    input.replace('\u{C}', "\n\n")
}

// ── Stage ───────────────────────────────────────────────────────────────────

/// Cleans every `.txt` file of the OCR folder into the cleaned folder,
/// keeping file names.
#[derive(Debug, Clone)]
pub struct CleanStage {
    ocr_dir_name: String,
    cleaned_dir_name: String,
}

impl CleanStage {
    pub fn new(folders: &FolderNames) -> Self {
        Self {
            ocr_dir_name: folders.ocr.clone(),
            cleaned_dir_name: folders.cleaned.clone(),
        }
    }
}

#[async_trait]
impl Stage for CleanStage {
    fn kind(&self) -> StageKind {
        StageKind::Clean
    }

    async fn run(&self, unit: &Path) -> Result<(), UnitError> {
        let unit_buf = unit.to_path_buf();
        let ocr_dir = unit.join(&self.ocr_dir_name);
        let cleaned_dir = unit.join(&self.cleaned_dir_name);

        let cleaned = tokio::task::spawn_blocking(move || {
            clean_blocking(&unit_buf, &ocr_dir, &cleaned_dir)
        })
        .await
        .map_err(|e| UnitError::StageFailed {
            stage: StageKind::Clean,
            unit: unit.to_path_buf(),
            status: "panicked".into(),
            detail: format!("clean task panicked: {e}"),
        })??;

        info!("Cleaned {} text file(s) for '{}'", cleaned, unit.display());
        Ok(())
    }
}

fn clean_blocking(unit: &Path, ocr_dir: &Path, cleaned_dir: &Path) -> Result<usize, UnitError> {
    let log = StageLog::fresh(unit, StageKind::Clean);

    if !ocr_dir.is_dir() {
        log.append(&format!("OCR folder '{}' not found", ocr_dir.display()));
        return Err(UnitError::MissingInput {
            unit: unit.to_path_buf(),
            what: format!("OCR folder '{}'", ocr_dir.display()),
        });
    }

    let mut inputs: Vec<PathBuf> = text_files(ocr_dir).collect();
    if inputs.is_empty() {
        log.append("No .txt files to clean");
        return Err(UnitError::MissingInput {
            unit: unit.to_path_buf(),
            what: format!("text files in '{}'", ocr_dir.display()),
        });
    }
    inputs.sort();

    std::fs::create_dir_all(cleaned_dir).map_err(|e| UnitError::io(cleaned_dir, &e))?;

    let mut failures = Vec::new();
    for input in &inputs {
        let name = file_name_lossy(input);
        let result = std::fs::read_to_string(input)
            .and_then(|raw| std::fs::write(cleaned_dir.join(&name), clean_text(&raw)));
        match result {
            Ok(()) => debug!("Cleaned '{}'", input.display()),
            Err(e) => {
                log.append(&format!("{name}: {e}"));
                failures.push(format!("{name}: {e}"));
            }
        }
    }

    if failures.is_empty() {
        Ok(inputs.len())
    } else {
        Err(UnitError::StageFailed {
            stage: StageKind::Clean,
            unit: unit.to_path_buf(),
            status: format!("{} of {} file(s) failed", failures.len(), inputs.len()),
            detail: failures.join("\n"),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
