// SPDX-License-Identifier: MIT
//
// Photo boundary detection.
//
// A scanned photo strip sits on a larger uniform scanner bed, so the
// photograph is the dominant high-contrast rectangle in the capture. The
// detector runs a classic contour pipeline (blur → Canny → dilate →
// external contours → polygon approximation) and reports its best-guess
// crop rectangle, or an explicit failure the caller turns into a fallback.

use image::{DynamicImage, GrayImage, Rgba, RgbaImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point as IPoint;
use scanbooth_core::geometry::{CropResult, Point, Quad};
use tracing::{debug, info, instrument, warn};

/// Edge-sensitivity threshold used when the caller supplies an invalid one.
pub const DEFAULT_THRESHOLD: i32 = 240;

/// Sigma of the noise-suppression blur applied before edge detection.
const BLUR_SIGMA: f32 = 1.4;

/// Pixel margin added around an accepted bounding box so the true edge is
/// not clipped.
const BOX_MARGIN: i32 = 5;

/// Minimum fraction of the image area a detection must cover.
const MIN_AREA_FRACTION: f64 = 0.10;

/// Locate the photograph's rectangular outline within a scanner capture.
///
/// `threshold` is the Canny low threshold (the high threshold is `2 *
/// threshold`, the standard 1:2 ratio); values outside 1–255 are silently
/// clamped to [`DEFAULT_THRESHOLD`].
///
/// Returns [`CropResult::Detected`] for a clean quadrilateral,
/// [`CropResult::Fallback`] when polygon approximation degraded to the
/// contour bounding box, and [`CropResult::Failed`] when no usable
/// detection exists — callers treat `Failed` as "use the configured
/// fallback rect". This function never panics on malformed input.
#[instrument(skip(image), fields(width = image.width(), height = image.height(), threshold))]
pub fn detect_bounds(image: &DynamicImage, threshold: i32) -> CropResult {
    if image.width() == 0 || image.height() == 0 {
        warn!("input image is empty");
        return CropResult::Failed {
            reason: "input image is empty".into(),
        };
    }

    let threshold = if (1..=255).contains(&threshold) {
        threshold
    } else {
        warn!(threshold, default = DEFAULT_THRESHOLD, "invalid threshold, using default");
        DEFAULT_THRESHOLD
    };

    let gray = match to_intensity(image) {
        Some(gray) => gray,
        None => {
            warn!(channels = image.color().channel_count(), "unsupported channel count");
            return CropResult::Failed {
                reason: format!(
                    "unsupported channel count: {}",
                    image.color().channel_count()
                ),
            };
        }
    };

    let blurred = gaussian_blur_f32(&gray, BLUR_SIGMA);
    let edges = canny(&blurred, threshold as f32, (threshold * 2) as f32);
    // Bridge broken contour segments with a small square kernel.
    let dilated = imageproc::morphology::dilate(&edges, Norm::LInf, 2);

    let contours: Vec<Contour<i32>> = find_contours(&dilated);
    let external: Vec<&Contour<i32>> = contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .collect();

    if external.is_empty() {
        debug!("no contours found");
        return CropResult::Failed {
            reason: "no contours found".into(),
        };
    }

    // Largest enclosed area wins; strict comparison keeps the first
    // encountered on ties, so iteration order stays deterministic.
    let mut best: &Contour<i32> = external[0];
    let mut best_area = contour_area(&best.points);
    for contour in external.iter().skip(1) {
        let area = contour_area(&contour.points);
        if area > best_area {
            best_area = area;
            best = contour;
        }
    }
    debug!(
        contour_count = external.len(),
        largest_area = best_area,
        "external contours extracted"
    );

    let (quad, degraded) = match approximate_rectangle(&best.points) {
        Some(corners) => (Quad(corners).ordered(), None),
        None => {
            // Not a clean quadrilateral at any tolerance — degrade to the
            // contour's axis-aligned bounding box.
            let reason = "no 4-vertex approximation; using contour bounding box".to_string();
            debug!(%reason, "polygon approximation degraded");
            match bounding_corners(&best.points) {
                Some(corners) => (Quad(corners).ordered(), Some(reason)),
                None => {
                    return CropResult::Failed {
                        reason: "contour has no extent".into(),
                    }
                }
            }
        }
    };

    let bbox = quad.bounding_rect();
    if bbox.is_degenerate() {
        warn!(?bbox, "degenerate bounding box");
        return CropResult::Failed {
            reason: "degenerate bounding box".into(),
        };
    }

    let image_area = image.width() as f64 * image.height() as f64;
    let coverage = bbox.area() as f64 / image_area;
    if coverage < MIN_AREA_FRACTION {
        warn!(
            coverage_pct = coverage * 100.0,
            "detected area too small, rejecting"
        );
        return CropResult::Failed {
            reason: format!(
                "detected area too small ({:.1}% of image)",
                coverage * 100.0
            ),
        };
    }

    let rect = bbox.expanded(BOX_MARGIN, image.width(), image.height());
    info!(?rect, coverage_pct = coverage * 100.0, degraded = degraded.is_some(), "bounds detected");

    match degraded {
        Some(reason) => CropResult::Fallback { rect, reason },
        None => CropResult::Detected { rect },
    }
}

/// Convert to single-channel intensity.
///
/// Single-channel input passes through unchanged; 3- and 4-channel input is
/// converted. Anything else (e.g. luma+alpha) is unsupported and yields
/// `None`.
fn to_intensity(image: &DynamicImage) -> Option<GrayImage> {
    match image.color().channel_count() {
        1 | 3 | 4 => Some(image.to_luma8()),
        _ => None,
    }
}

/// Enclosed area of a closed contour via the shoelace formula.
fn contour_area(points: &[IPoint<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let n = points.len();
    let mut area = 0.0f64;
    for i in 0..n {
        let j = (i + 1) % n;
        area += points[i].x as f64 * points[j].y as f64;
        area -= points[j].x as f64 * points[i].y as f64;
    }
    area.abs() / 2.0
}

/// Approximate a contour to exactly 4 corners.
///
/// Starts at a simplification tolerance of 2% of the contour perimeter; if
/// that does not yield 4 vertices, the tolerance is swept from 1% to 5% in
/// 0.5% steps. `None` means no tolerance produced a quadrilateral.
fn approximate_rectangle(points: &[IPoint<i32>]) -> Option<[Point; 4]> {
    if points.is_empty() {
        return None;
    }

    let perimeter = arc_length(points, true);
    if perimeter <= 0.0 {
        return None;
    }

    let try_epsilon = |mult: f64| -> Option<[Point; 4]> {
        let approx = approximate_polygon_dp(points, mult * perimeter, true);
        if approx.len() == 4 {
            Some([
                Point::new(approx[0].x, approx[0].y),
                Point::new(approx[1].x, approx[1].y),
                Point::new(approx[2].x, approx[2].y),
                Point::new(approx[3].x, approx[3].y),
            ])
        } else {
            None
        }
    };

    if let Some(corners) = try_epsilon(0.02) {
        return Some(corners);
    }
    // Sweep 1% to 5% in 0.5% steps.
    for step in 2..=10 {
        if let Some(corners) = try_epsilon(step as f64 * 0.005) {
            return Some(corners);
        }
    }
    None
}

/// Axis-aligned bounding box of a contour, as 4 corners.
fn bounding_corners(points: &[IPoint<i32>]) -> Option<[Point; 4]> {
    let min_x = points.iter().map(|p| p.x).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_y = points.iter().map(|p| p.y).max()?;
    if min_x == max_x || min_y == max_y {
        return None;
    }
    Some([
        Point::new(min_x, min_y),
        Point::new(max_x, min_y),
        Point::new(max_x, max_y),
        Point::new(min_x, max_y),
    ])
}

/// Correct the perspective of a photo given its 4 corners.
///
/// Output width is the longer of the top and bottom edges, output height
/// the longer of the left and right edges; the corners are mapped to that
/// axis-aligned rectangle via a planar homography and the image resampled
/// with bilinear interpolation. Degenerate corners (collinear / zero area)
/// or non-positive target dimensions return the original image unchanged.
#[instrument(skip(image, quad), fields(width = image.width(), height = image.height()))]
pub fn correct_perspective(image: &DynamicImage, quad: &Quad) -> DynamicImage {
    if image.width() == 0 || image.height() == 0 {
        warn!("empty image, skipping perspective correction");
        return image.clone();
    }

    let ordered = quad.ordered();
    if ordered.area() <= 0.0 {
        warn!("degenerate corners, skipping perspective correction");
        return image.clone();
    }
    let [tl, tr, br, bl] = ordered.0;

    let width_top = tl.distance(&tr);
    let width_bottom = bl.distance(&br);
    let out_w = width_top.max(width_bottom) as i64;

    let height_left = tl.distance(&bl);
    let height_right = tr.distance(&br);
    let out_h = height_left.max(height_right) as i64;

    if out_w <= 0 || out_h <= 0 {
        warn!(out_w, out_h, "non-positive target dimensions, skipping");
        return image.clone();
    }
    let (out_w, out_h) = (out_w as u32, out_h as u32);

    let src: [(f32, f32); 4] = [
        (tl.x as f32, tl.y as f32),
        (tr.x as f32, tr.y as f32),
        (br.x as f32, br.y as f32),
        (bl.x as f32, bl.y as f32),
    ];
    let dst: [(f32, f32); 4] = [
        (0.0, 0.0),
        ((out_w - 1) as f32, 0.0),
        ((out_w - 1) as f32, (out_h - 1) as f32),
        (0.0, (out_h - 1) as f32),
    ];

    let projection = match Projection::from_control_points(src, dst) {
        Some(p) => p,
        None => {
            warn!("could not derive homography, skipping perspective correction");
            return image.clone();
        }
    };

    let rgba = image.to_rgba8();
    let mut output = RgbaImage::new(out_w, out_h);
    warp_into(
        &rgba,
        &projection,
        Interpolation::Bilinear,
        Rgba([255u8, 255, 255, 255]),
        &mut output,
    );

    info!(out_w, out_h, "perspective corrected");
    DynamicImage::ImageRgba8(output)
}
