//! Built-in split stage: cut overly tall page images into segments.
//!
//! Long-strip webtoon pages can be tens of thousands of pixels tall, far past
//! what the OCR engine handles well. The first page of the unit (`1.png`,
//! `1.jpg`, ...) is loaded, converted to grayscale unless it is already
//! grayscale or RGB, and written to the split folder either unchanged as
//! `1.png` or as consecutive horizontal bands `1_001.png`, `1_002.png`, ...
//! no taller than the configured maximum.
//!
//! Only page one is handled. Archives are normalized so that their first
//! page is `1.png`, and strip-format chapters ship as a single page.
//!
//! Decoding and encoding are CPU-bound, so the work runs inside
//! `tokio::task::spawn_blocking`.

use super::{Stage, StageKind, StageLog};
use crate::error::UnitError;
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extensions accepted for the first page, in lookup order.
pub const PAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tiff", "tif"];

#[derive(Debug, Clone)]
pub struct SplitStage {
    max_height: u32,
    out_dir_name: String,
}

impl SplitStage {
    pub fn new(max_height: u32, out_dir_name: impl Into<String>) -> Self {
        Self {
            max_height: max_height.max(1),
            out_dir_name: out_dir_name.into(),
        }
    }
}

#[async_trait]
impl Stage for SplitStage {
    fn kind(&self) -> StageKind {
        StageKind::Split
    }

    async fn run(&self, unit: &Path) -> Result<(), UnitError> {
        let unit_buf = unit.to_path_buf();
        let max_height = self.max_height;
        let out_dir = unit.join(&self.out_dir_name);

        let written = tokio::task::spawn_blocking(move || {
            split_blocking(&unit_buf, &out_dir, max_height)
        })
        .await
        .map_err(|e| UnitError::StageFailed {
            stage: StageKind::Split,
            unit: unit.to_path_buf(),
            status: "panicked".into(),
            detail: format!("split task panicked: {e}"),
        })??;

        info!("Split '{}' into {} image(s)", unit.display(), written);
        Ok(())
    }
}

/// Locate `1.<ext>` for the first supported extension present.
pub fn find_first_page(unit: &Path) -> Option<PathBuf> {
    PAGE_EXTENSIONS
        .iter()
        .map(|ext| unit.join(format!("1.{ext}")))
        .find(|p| p.is_file())
}

/// Blocking implementation. Returns the number of images written.
fn split_blocking(unit: &Path, out_dir: &Path, max_height: u32) -> Result<usize, UnitError> {
    let log = StageLog::fresh(unit, StageKind::Split);

    let Some(page) = find_first_page(unit) else {
        log.append("No first page found (1.png, 1.jpg, 1.jpeg, 1.tiff, 1.tif)");
        return Err(UnitError::MissingInput {
            unit: unit.to_path_buf(),
            what: "first page image 1.png/1.jpg/1.jpeg/1.tiff/1.tif".into(),
        });
    };

    let failed = |status: &str, detail: String| {
        log.append(&detail);
        UnitError::StageFailed {
            stage: StageKind::Split,
            unit: unit.to_path_buf(),
            status: status.to_string(),
            detail,
        }
    };

    // Archives may rename a JPEG to 1.png, so the format is sniffed from content.
    let img = ImageReader::open(&page)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| failed("read failed", format!("Cannot open {}: {}", page.display(), e)))?
        .decode()
        .map_err(|e| failed("decode failed", format!("Cannot decode {}: {}", page.display(), e)))?;
    let img = match img {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => img,
        other => DynamicImage::ImageLuma8(other.to_luma8()),
    };

    std::fs::create_dir_all(out_dir).map_err(|e| UnitError::io(out_dir, &e))?;

    let (width, height) = img.dimensions();
    debug!("{}: {}x{} px (max height {})", page.display(), width, height, max_height);

    if height <= max_height {
        let target = out_dir.join("1.png");
        img.save_with_format(&target, ImageFormat::Png)
            .map_err(|e| failed("encode failed", format!("Cannot save {}: {}", target.display(), e)))?;
        return Ok(1);
    }

    let mut written = 0;
    let mut top = 0;
    while top < height {
        let band = max_height.min(height - top);
        let target = out_dir.join(format!("1_{:03}.png", written + 1));
        img.crop_imm(0, top, width, band)
            .save_with_format(&target, ImageFormat::Png)
            .map_err(|e| failed("encode failed", format!("Cannot save {}: {}", target.display(), e)))?;
        written += 1;
        top += band;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, RgbaImage};

    fn write_page(unit: &Path, name: &str, width: u32, height: u32) {
        let img = GrayImage::from_fn(width, height, |_, y| Luma([(y * 9 % 256) as u8]));
        img.save(unit.join(name)).unwrap();
    }

    #[tokio::test]
    async fn tall_page_is_cut_into_bands() {
        let unit = tempfile::tempdir().unwrap();
        write_page(unit.path(), "1.png", 10, 25);

        SplitStage::new(10, "images_processed")
            .run(unit.path())
            .await
            .unwrap();

        let out = unit.path().join("images_processed");
        let heights: Vec<u32> = ["1_001.png", "1_002.png", "1_003.png"]
            .iter()
            .map(|n| image::open(out.join(n)).unwrap().height())
            .collect();
        assert_eq!(heights, vec![10, 10, 5]);
        assert!(!out.join("1.png").exists());
        assert!(!out.join("1_004.png").exists());
    }

    #[tokio::test]
    async fn short_page_is_copied_as_png() {
        let unit = tempfile::tempdir().unwrap();
        write_page(unit.path(), "1.png", 8, 8);

        SplitStage::new(100, "images_processed")
            .run(unit.path())
            .await
            .unwrap();

        let single = unit.path().join("images_processed").join("1.png");
        assert_eq!(image::open(single).unwrap().dimensions(), (8, 8));
    }

    #[tokio::test]
    async fn rgba_page_is_converted_to_grayscale() {
        let unit = tempfile::tempdir().unwrap();
        RgbaImage::new(4, 4).save(unit.path().join("1.png")).unwrap();

        SplitStage::new(100, "images_processed")
            .run(unit.path())
            .await
            .unwrap();

        let out = image::open(unit.path().join("images_processed").join("1.png")).unwrap();
        assert!(matches!(out, DynamicImage::ImageLuma8(_)));
    }

    #[tokio::test]
    async fn missing_first_page_is_missing_input() {
        let unit = tempfile::tempdir().unwrap();
        write_page(unit.path(), "2.png", 4, 4);

        let err = SplitStage::new(100, "images_processed")
            .run(unit.path())
            .await
            .unwrap_err();
        assert!(matches!(err, UnitError::MissingInput { .. }));
        assert!(unit.path().join("split_errors.log").exists());
    }

    #[test]
    fn first_page_prefers_png() {
        let unit = tempfile::tempdir().unwrap();
        std::fs::write(unit.path().join("1.jpg"), b"x").unwrap();
        std::fs::write(unit.path().join("1.png"), b"x").unwrap();
        assert_eq!(find_first_page(unit.path()), Some(unit.path().join("1.png")));
    }
}
