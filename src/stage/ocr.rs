//! Built-in OCR stage backed by the `tesseract` command-line tool.
//!
//! Every `.png` segment in the split folder (except `*_original.png`
//! backups) is recognised in name order with
//! `tesseract <image> stdout -l <lang> --dpi 300 --psm 3 --oem 3`. Page texts
//! are joined with a blank line and written to
//! `<unit>/<ocr folder>/Chapter_<NNNN>_<Title>.txt`.
//!
//! ## Failure model
//!
//! A segment that tesseract rejects does not abort the chapter: an inline
//! `[OCR ERROR ON SEGMENT ...]` marker takes its place and the problem is
//! recorded in `ocr_errors.log`. A missing tesseract binary fails the whole
//! stage, since no segment can succeed.

use super::{Stage, StageKind, StageLog};
use crate::config::FolderNames;
use crate::error::UnitError;
use crate::naming::{chapter_text_name, file_name_lossy, sort_paths_natural};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Engine options passed after the language.
pub const TESSERACT_ARGS: &[&str] = &["--dpi", "300", "--psm", "3", "--oem", "3"];

#[derive(Debug, Clone)]
pub struct TesseractStage {
    bin: String,
    language: String,
    split_dir_name: String,
    ocr_dir_name: String,
}

/// Why a single segment produced no text.
enum SegmentError {
    /// The executable could not be started at all.
    Unavailable(String),
    /// Tesseract ran and reported failure for this image.
    Failed(String),
}

impl TesseractStage {
    pub fn new(bin: &str, language: &str, folders: &FolderNames) -> Self {
        Self {
            bin: bin.to_string(),
            language: language.to_string(),
            split_dir_name: folders.split.clone(),
            ocr_dir_name: folders.ocr.clone(),
        }
    }

    async fn recognize(&self, image: &Path) -> Result<String, SegmentError> {
        let output = Command::new(&self.bin)
            .arg(image)
            .arg("stdout")
            .args(["-l", self.language.as_str()])
            .args(TESSERACT_ARGS)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SegmentError::Unavailable(format!("cannot run '{}': {}", self.bin, e)))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        // Markers are matched line-wise by the clean stage.
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = match stderr.split_whitespace().collect::<Vec<_>>().join(" ") {
            line if line.is_empty() => output.status.to_string(),
            line => line,
        };
        Err(SegmentError::Failed(detail))
    }
}

/// PNG segments to recognise, in natural name order.
pub fn list_segments(split_dir: &Path) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(split_dir)
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            let name = file_name_lossy(p).to_lowercase();
            p.is_file() && name.ends_with(".png") && !name.ends_with("_original.png")
        })
        .collect();
    sort_paths_natural(&mut images);
    images
}

#[async_trait]
impl Stage for TesseractStage {
    fn kind(&self) -> StageKind {
        StageKind::Ocr
    }

    async fn run(&self, unit: &Path) -> Result<(), UnitError> {
        let log = StageLog::fresh_async(unit, StageKind::Ocr).await;
        let split_dir = unit.join(&self.split_dir_name);

        let listed = split_dir.clone();
        let images = tokio::task::spawn_blocking(move || list_segments(&listed))
            .await
            .map_err(|e| UnitError::StageFailed {
                stage: StageKind::Ocr,
                unit: unit.to_path_buf(),
                status: "panicked".into(),
                detail: format!("segment listing panicked: {e}"),
            })?;
        if images.is_empty() {
            log.append_async(&format!("No PNG segments in '{}'", split_dir.display()))
                .await;
            return Err(UnitError::MissingInput {
                unit: unit.to_path_buf(),
                what: format!("PNG segments in '{}'", split_dir.display()),
            });
        }

        info!(
            "OCR of {} segment(s) for '{}' (lang={})",
            images.len(),
            unit.display(),
            self.language
        );

        let mut pages = Vec::with_capacity(images.len());
        let mut failed = 0usize;
        for image in &images {
            let name = file_name_lossy(image);
            match self.recognize(image).await {
                Ok(text) => {
                    debug!("{}: {} chars", name, text.len());
                    pages.push(text);
                }
                Err(SegmentError::Unavailable(detail)) => {
                    log.append_async(&detail).await;
                    return Err(UnitError::StageFailed {
                        stage: StageKind::Ocr,
                        unit: unit.to_path_buf(),
                        status: "tesseract unavailable".into(),
                        detail,
                    });
                }
                Err(SegmentError::Failed(detail)) => {
                    warn!("OCR failed on segment {}: {}", name, detail);
                    log.append_async(&format!("[IMAGE: {name}] {detail}")).await;
                    pages.push(format!("[OCR ERROR ON SEGMENT {name}: {detail}]"));
                    failed += 1;
                }
            }
        }

        let ocr_dir = unit.join(&self.ocr_dir_name);
        tokio::fs::create_dir_all(&ocr_dir)
            .await
            .map_err(|e| UnitError::io(&ocr_dir, &e))?;
        let target = ocr_dir.join(chapter_text_name(&file_name_lossy(unit)));
        tokio::fs::write(&target, pages.join("\n\n"))
            .await
            .map_err(|e| UnitError::io(&target, &e))?;

        if failed > 0 {
            warn!(
                "{} of {} segment(s) failed for '{}'; see {}",
                failed,
                images.len(),
                unit.display(),
                log.path().display()
            );
        }
        info!("OCR text written to '{}'", target.display());
        Ok(())
    }
}
