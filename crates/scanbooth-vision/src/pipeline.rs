// SPDX-License-Identifier: MIT
//
// Crop pipeline — load a raw capture, locate the photo bounds (with manual
// and whole-image fallbacks), crop, and re-encode as a JPEG delivery
// artifact.

use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use scanbooth_core::error::{KioskError, Result};
use scanbooth_core::geometry::{CropRect, CropResult};
use tracing::{debug, info, instrument, warn};

use crate::detect::detect_bounds;

/// JPEG quality used when the caller supplies an out-of-range value.
const DEFAULT_JPEG_QUALITY: u8 = 92;

/// Outcome of a successful crop/encode run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedScan {
    /// The final crop region, clamped inside image bounds.
    pub rect: CropRect,
    /// Why detection fell back, when it did. Degraded detection is not an
    /// error; the artifact is still produced.
    pub degraded: Option<String>,
}

/// Crop a raw capture and persist it as a JPEG artifact.
///
/// Detection failure falls back to `manual_rect` intersected with the
/// image bounds, and to the full image if that intersection is degenerate;
/// a successful run never produces a zero-area or out-of-bounds crop.
/// Out-of-range `jpeg_quality` values are replaced with a safe default.
///
/// Exactly one file is written on success. The artifact is encoded in
/// memory first so a failure cannot leave a partial file behind, and the
/// raw input is never overwritten.
#[instrument(skip_all, fields(input = %input_path.display(), output = %output_path.display()))]
pub fn process(
    input_path: &Path,
    output_path: &Path,
    detection_threshold: i32,
    manual_rect: CropRect,
    jpeg_quality: u8,
) -> Result<ProcessedScan> {
    if input_path == output_path {
        return Err(KioskError::ImageError(
            "output path equals raw input path".into(),
        ));
    }

    let image = image::open(input_path).map_err(|err| {
        KioskError::ImageError(format!("failed to load {}: {}", input_path.display(), err))
    })?;
    if image.width() == 0 || image.height() == 0 {
        return Err(KioskError::ImageError(format!(
            "image is empty: {}",
            input_path.display()
        )));
    }
    let (img_w, img_h) = (image.width(), image.height());

    let (rect, degraded) = match detect_bounds(&image, detection_threshold) {
        CropResult::Detected { rect } => (rect, None),
        CropResult::Fallback { rect, reason } => {
            debug!(%reason, "detection degraded");
            (rect, Some(reason))
        }
        CropResult::Failed { reason } => {
            warn!(%reason, "detection failed, using manual fallback rect");
            let fallback = manual_rect.clamp_to(img_w, img_h);
            if fallback.is_degenerate() {
                // Last resort: the whole image. Never a zero-area crop.
                (
                    CropRect::full(img_w, img_h),
                    Some(format!("{reason}; manual rect degenerate, using full image")),
                )
            } else {
                (fallback, Some(reason))
            }
        }
    };

    // Defensive re-clamp, detector output included.
    let rect = rect.clamp_to(img_w, img_h);
    if rect.is_degenerate() {
        return Err(KioskError::ImageError(format!(
            "crop rect degenerate after clamping: {rect:?}"
        )));
    }

    let cropped = image.crop_imm(
        rect.x as u32,
        rect.y as u32,
        rect.width as u32,
        rect.height as u32,
    );

    let quality = if jpeg_quality <= 100 {
        jpeg_quality
    } else {
        warn!(jpeg_quality, default = DEFAULT_JPEG_QUALITY, "invalid JPEG quality, using default");
        DEFAULT_JPEG_QUALITY
    };

    let mut encoded = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut encoded, quality);
    cropped
        .to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|err| KioskError::ImageError(format!("JPEG encoding failed: {err}")))?;

    std::fs::write(output_path, &encoded)?;

    info!(?rect, bytes = encoded.len(), "artifact written");
    Ok(ProcessedScan { rect, degraded })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma};
    use tempfile::TempDir;

    fn write_capture(dir: &TempDir, name: &str, img: &DynamicImage) -> std::path::PathBuf {
        let path = dir.path().join(name);
        img.save(&path).expect("save capture");
        path
    }

    fn capture_with_photo() -> DynamicImage {
        let mut img = GrayImage::from_pixel(400, 500, Luma([240u8]));
        for y in 60..440 {
            for x in 50..350 {
                img.put_pixel(x, y, Luma([30u8]));
            }
        }
        DynamicImage::ImageLuma8(img)
    }

    fn uniform_capture() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(400, 500, Luma([200u8])))
    }

    #[test]
    fn detected_crop_stays_in_bounds() {
        let dir = TempDir::new().unwrap();
        let input = write_capture(&dir, "raw.png", &capture_with_photo());
        let output = dir.path().join("strip.jpg");

        let report = process(&input, &output, 50, CropRect::new(0, 0, 400, 500), 92)
            .expect("process succeeds");

        assert!(output.exists());
        assert!(!report.rect.is_degenerate());
        assert!(report.rect.x >= 0 && report.rect.y >= 0);
        assert!(report.rect.x + report.rect.width <= 400);
        assert!(report.rect.y + report.rect.height <= 500);
    }

    #[test]
    fn manual_fallback_is_clamped() {
        let dir = TempDir::new().unwrap();
        let input = write_capture(&dir, "raw.png", &uniform_capture());
        let output = dir.path().join("strip.jpg");

        // Detection fails on a featureless image; the oversized manual rect
        // with negative origin must be clamped, never rejected.
        let report = process(&input, &output, 50, CropRect::new(-100, -100, 5000, 5000), 92)
            .expect("process succeeds");

        assert_eq!(report.rect, CropRect::new(0, 0, 400, 500));
        assert!(report.degraded.is_some());
        assert!(output.exists());
    }

    #[test]
    fn degenerate_manual_rect_falls_back_to_full_image() {
        let dir = TempDir::new().unwrap();
        let input = write_capture(&dir, "raw.png", &uniform_capture());
        let output = dir.path().join("strip.jpg");

        // Manual rect entirely outside the image: intersection is
        // degenerate, so the whole image is used as last resort.
        let report = process(&input, &output, 50, CropRect::new(9000, 9000, 10, 10), 92)
            .expect("process succeeds");

        assert_eq!(report.rect, CropRect::full(400, 500));
        assert!(output.exists());
    }

    #[test]
    fn out_of_range_quality_is_replaced() {
        let dir = TempDir::new().unwrap();
        let input = write_capture(&dir, "raw.png", &capture_with_photo());
        let output = dir.path().join("strip.jpg");

        process(&input, &output, 50, CropRect::new(0, 0, 400, 500), 255)
            .expect("process succeeds with clamped quality");
        assert!(output.exists());
    }

    #[test]
    fn unreadable_input_is_a_single_failure() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("missing.png");
        let output = dir.path().join("strip.jpg");

        let err = process(&input, &output, 50, CropRect::new(0, 0, 10, 10), 92).unwrap_err();
        assert!(matches!(err, KioskError::ImageError(_)));
        // No partial artifact may be left behind.
        assert!(!output.exists());
    }

    #[test]
    fn refuses_to_overwrite_raw_input() {
        let dir = TempDir::new().unwrap();
        let input = write_capture(&dir, "raw.png", &capture_with_photo());

        let err = process(&input, &input, 50, CropRect::new(0, 0, 400, 500), 92).unwrap_err();
        assert!(matches!(err, KioskError::ImageError(_)));
    }
}
