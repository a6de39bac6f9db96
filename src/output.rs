//! Result types returned by a run.
//!
//! A run never fails because of a single unit or book; instead every unit and
//! book gets an entry here. Everything is `Serialize` so the CLI can print
//! the report as JSON.

use crate::error::UnitError;
use crate::stage::StageKind;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Why a unit needed no stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A matching file already sits in the book's final directory.
    FinalTextPresent,
    /// The unit already holds cleaned text.
    CleanedTextPresent,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::FinalTextPresent => "final text present",
            SkipReason::CleanedTextPresent => "cleaned text present",
        })
    }
}

/// What happened to one chapter unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitOutcome {
    /// The listed stages ran and succeeded.
    Processed { stages: Vec<StageKind> },
    /// Nothing to do.
    Skipped { reason: SkipReason },
    /// A stage failed; the unit keeps its last good state.
    Failed { error: UnitError },
}

impl UnitOutcome {
    /// Processed or skipped: the unit holds cleaned text or a final text.
    pub fn is_done(&self) -> bool {
        !matches!(self, UnitOutcome::Failed { .. })
    }
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOutcome::Processed { stages } => {
                let names: Vec<String> = stages.iter().map(|s| s.to_string()).collect();
                write!(f, "processed ({})", names.join(", "))
            }
            UnitOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
            UnitOutcome::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

/// Report for one chapter unit.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub book: String,
    pub unit: PathBuf,
    pub outcome: UnitOutcome,
    /// Set when the unit finished but its progress could not be saved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_error: Option<UnitError>,
    pub duration_ms: u64,
}

/// State of a book after post-processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BookStatus {
    /// Final texts were collected and the book is marked complete.
    Completed {
        collected: usize,
        /// The book was already marked complete before this run.
        previously_complete: bool,
    },
    /// Some units have no cleaned text yet.
    Incomplete { ready: usize, total: usize },
    /// No chapter units were found.
    Empty,
    /// Collection or cleanup failed; the book is not marked complete.
    CollectionFailed { detail: String },
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookStatus::Completed {
                collected,
                previously_complete: false,
            } => write!(f, "completed ({collected} text(s) collected)"),
            BookStatus::Completed { collected, .. } => {
                write!(f, "already complete ({collected} text(s) re-collected)")
            }
            BookStatus::Incomplete { ready, total } => {
                write!(f, "incomplete ({ready}/{total} chapter(s) ready)")
            }
            BookStatus::Empty => f.write_str("no chapters found"),
            BookStatus::CollectionFailed { detail } => write!(f, "collection failed: {detail}"),
        }
    }
}

/// Report for one book.
#[derive(Debug, Clone, Serialize)]
pub struct BookReport {
    pub name: String,
    pub path: PathBuf,
    /// Units enumerated this run.
    pub units: usize,
    /// Units handed to the worker pool.
    pub submitted: usize,
    /// The stored cursor matched none of the current units.
    pub stale_cursor: bool,
    pub status: BookStatus,
}

/// Report for a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// RFC 3339 local start time.
    pub started_at: String,
    pub books: Vec<BookReport>,
    pub units: Vec<UnitReport>,
    /// Failures not tied to a processed unit, such as unreadable archives.
    pub errors: Vec<UnitError>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn processed(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Processed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Failed { .. }))
    }

    pub fn completed_books(&self) -> usize {
        self.books
            .iter()
            .filter(|b| matches!(b.status, BookStatus::Completed { .. }))
            .count()
    }

    /// True if any unit, archive, progress save or collection failed.
    pub fn has_failures(&self) -> bool {
        self.failed() > 0
            || !self.errors.is_empty()
            || self.units.iter().any(|u| u.progress_error.is_some())
            || self
                .books
                .iter()
                .any(|b| matches!(b.status, BookStatus::CollectionFailed { .. }))
    }

    pub fn book(&self, name: &str) -> Option<&BookReport> {
        self.books.iter().find(|b| b.name == name)
    }

    fn count(&self, pred: impl Fn(&UnitOutcome) -> bool) -> usize {
        self.units.iter().filter(|u| pred(&u.outcome)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(outcome: UnitOutcome) -> UnitReport {
        UnitReport {
            book: "Book".into(),
            unit: PathBuf::from("/b/Book/c1"),
            outcome,
            progress_error: None,
            duration_ms: 1,
        }
    }

    #[test]
    fn counts_by_outcome() {
        let report = RunReport {
            units: vec![
                unit(UnitOutcome::Processed {
                    stages: vec![StageKind::Clean],
                }),
                unit(UnitOutcome::Skipped {
                    reason: SkipReason::CleanedTextPresent,
                }),
                unit(UnitOutcome::Failed {
                    error: UnitError::MissingInput {
                        unit: PathBuf::from("c1"),
                        what: "1.png".into(),
                    },
                }),
            ],
            ..Default::default()
        };
        assert_eq!(report.processed(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert!(report.has_failures());
    }

    #[test]
    fn outcome_display() {
        let o = UnitOutcome::Processed {
            stages: vec![StageKind::Split, StageKind::Ocr, StageKind::Clean],
        };
        assert_eq!(o.to_string(), "processed (split, ocr, clean)");
        let s = UnitOutcome::Skipped {
            reason: SkipReason::FinalTextPresent,
        };
        assert_eq!(s.to_string(), "skipped: final text present");
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let o = UnitOutcome::Skipped {
            reason: SkipReason::FinalTextPresent,
        };
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "final_text_present");
    }

    #[test]
    fn book_status_display() {
        let s = BookStatus::Incomplete { ready: 2, total: 3 };
        assert_eq!(s.to_string(), "incomplete (2/3 chapter(s) ready)");
    }
}
