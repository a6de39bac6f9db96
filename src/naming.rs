//! Chapter ordering and output naming.
//!
//! Two small, pure helpers shared by the orchestrator and the OCR stage:
//!
//! - [`natural_cmp`] orders names the way a human reads them, so
//!   `Chapter 2` sorts before `Chapter 10`.
//! - [`chapter_text_name`] derives the `Chapter_<NNNN>_<Title>.txt` file name
//!   for a unit from its directory name.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::archive::UNZIPPED_SUFFIX;

// ── Natural sort ─────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Chunk<'a> {
    Text(String),
    /// Digit run with leading zeros stripped.
    Number(&'a str),
}

impl Ord for Chunk<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Chunk::Number(a), Chunk::Number(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Chunk::Text(a), Chunk::Text(b)) => a.cmp(b),
            (Chunk::Number(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Chunk<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Split `s` into alternating case-folded text and numeric chunks.
fn chunks(s: &str) -> Vec<Chunk<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_digits = false;
    for (i, c) in s.char_indices() {
        let digit = c.is_ascii_digit();
        if i > start && digit != in_digits {
            out.push(chunk(&s[start..i], in_digits));
            start = i;
        }
        if i == start {
            in_digits = digit;
        }
    }
    if start < s.len() {
        out.push(chunk(&s[start..], in_digits));
    }
    out
}

fn chunk(part: &str, digits: bool) -> Chunk<'_> {
    if digits {
        let trimmed = part.trim_start_matches('0');
        Chunk::Number(if trimmed.is_empty() { "0" } else { trimmed })
    } else {
        Chunk::Text(part.to_lowercase())
    }
}

/// Compare two names with embedded numbers compared numerically and text
/// compared case-insensitively.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    chunks(a).cmp(&chunks(b)).then_with(|| a.cmp(b))
}

/// Sort paths by the natural order of their final component.
pub fn sort_paths_natural(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| natural_cmp(&file_name_lossy(a), &file_name_lossy(b)));
}

pub(crate) fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ── Chapter file naming ──────────────────────────────────────────────────────

static RE_NUMBER_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:Chapter\s*)?(\d+)\s*(?:[ -]+)?(.*)$").unwrap());

static RE_REPEATED_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:Chapter\s*\d+\s*[ -]+\s*)*").unwrap());

static RE_FORBIDDEN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[\\/:*?"<>|]"#).unwrap());

static RE_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ -]+").unwrap());

/// Chapter number and raw title parsed from a unit directory name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterName {
    pub number: Option<u64>,
    pub title: String,
}

/// Parse `"Chapter 12 - Title"`, `"12 Title"`, `"Title"` style names.
/// A trailing archive suffix is ignored.
pub fn parse_chapter_name(unit_name: &str) -> ChapterName {
    let base = unit_name.replace(UNZIPPED_SUFFIX, "");
    if let Some(caps) = RE_NUMBER_TITLE.captures(&base) {
        let number = caps[1].parse::<u64>().ok();
        let title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        return ChapterName {
            number,
            title: title.to_string(),
        };
    }
    warn!("No chapter number in '{}'; using the full name as title", base);
    ChapterName {
        number: None,
        title: base,
    }
}

/// Make `title` safe for use in a file name.
pub fn sanitize_title(title: &str) -> String {
    let s = RE_REPEATED_PREFIX.replace(title, "");
    let s = RE_FORBIDDEN.replace_all(s.trim(), "");
    let s = RE_SEPARATORS.replace_all(&s, "_");
    s.trim_matches('_').to_string()
}

/// File stem for the text produced from `unit_name`, without extension.
pub fn chapter_stem(unit_name: &str) -> String {
    let parsed = parse_chapter_name(unit_name);
    let title = sanitize_title(&parsed.title);
    match (parsed.number, title.is_empty()) {
        (Some(n), false) => format!("Chapter_{n:04}_{title}"),
        (Some(n), true) => format!("Chapter_{n:04}"),
        (None, false) => format!("Chapter_{title}"),
        (None, true) => "untitled_chapter".to_string(),
    }
}

/// `Chapter_<NNNN>_<Title>.txt` for `unit_name`.
pub fn chapter_text_name(unit_name: &str) -> String {
    format!("{}.txt", chapter_stem(unit_name))
}
