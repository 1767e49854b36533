// SPDX-License-Identifier: MIT
//
// Geometry primitives for boundary detection: points, corner quads with
// canonical ordering, and integer crop rectangles with clamping helpers.

use serde::{Deserialize, Serialize};

/// A 2-D integer point in image coordinates (origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Four corners of a detected quadrilateral.
///
/// Unordered until [`Quad::ordered`] is called; once canonicalized the
/// indices are [top-left, top-right, bottom-right, bottom-left].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quad(pub [Point; 4]);

impl Quad {
    /// Canonicalize the corners into top-left / top-right / bottom-right /
    /// bottom-left order.
    ///
    /// Two independent sort keys: the corner with minimum `x + y` is the
    /// top-left and maximum `x + y` is the bottom-right; the corner with
    /// minimum `y - x` is the top-right and maximum `y - x` is the
    /// bottom-left. Re-ordering an already-ordered quad returns the same
    /// quad.
    pub fn ordered(&self) -> Quad {
        let pts = &self.0;

        let top_left = *pts
            .iter()
            .min_by_key(|p| p.x + p.y)
            .expect("quad has four points");
        let bottom_right = *pts
            .iter()
            .max_by_key(|p| p.x + p.y)
            .expect("quad has four points");
        let top_right = *pts
            .iter()
            .min_by_key(|p| p.y - p.x)
            .expect("quad has four points");
        let bottom_left = *pts
            .iter()
            .max_by_key(|p| p.y - p.x)
            .expect("quad has four points");

        Quad([top_left, top_right, bottom_right, bottom_left])
    }

    /// Axis-aligned bounding box of the corners.
    pub fn bounding_rect(&self) -> CropRect {
        let min_x = self.0.iter().map(|p| p.x).min().unwrap_or(0);
        let max_x = self.0.iter().map(|p| p.x).max().unwrap_or(0);
        let min_y = self.0.iter().map(|p| p.y).min().unwrap_or(0);
        let max_y = self.0.iter().map(|p| p.y).max().unwrap_or(0);
        CropRect {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        }
    }

    /// Area of the quadrilateral via the shoelace formula.
    ///
    /// Corners should be in canonical order (CW or CCW).
    pub fn area(&self) -> f64 {
        let pts = &self.0;
        let mut area = 0.0f64;
        for i in 0..4 {
            let j = (i + 1) % 4;
            area += pts[i].x as f64 * pts[j].y as f64;
            area -= pts[j].x as f64 * pts[i].y as f64;
        }
        area.abs() / 2.0
    }
}

/// An integer crop rectangle in image coordinates.
///
/// May be degenerate (non-positive width/height) after an intersection;
/// callers check [`CropRect::is_degenerate`] before using it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl CropRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The full bounds of an image of the given dimensions.
    pub fn full(img_width: u32, img_height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width: img_width as i32,
            height: img_height as i32,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_degenerate() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    /// Intersection with another rectangle. The result may be degenerate.
    pub fn intersect(&self, other: &CropRect) -> CropRect {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        CropRect {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    /// Clamp the rectangle fully inside an image of the given dimensions.
    /// The result may be degenerate if the rect lies entirely outside.
    pub fn clamp_to(&self, img_width: u32, img_height: u32) -> CropRect {
        self.intersect(&CropRect::full(img_width, img_height))
    }

    /// Expand by `margin` pixels on all sides, clamped to image bounds.
    pub fn expanded(&self, margin: i32, img_width: u32, img_height: u32) -> CropRect {
        let x = (self.x - margin).max(0);
        let y = (self.y - margin).max(0);
        let width = (self.width + 2 * margin).min(img_width as i32 - x);
        let height = (self.height + 2 * margin).min(img_height as i32 - y);
        CropRect {
            x,
            y,
            width,
            height,
        }
    }
}

/// Outcome of boundary detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CropResult {
    /// A clean quadrilateral was found; `rect` is its expanded bounding box,
    /// clamped inside image bounds with positive dimensions.
    Detected { rect: CropRect },
    /// Detection degraded to a coarser region (e.g. contour bounding box
    /// when no 4-vertex approximation exists, or the caller's manual rect).
    Fallback { rect: CropRect, reason: String },
    /// No usable detection; the caller falls back to its configured rect or
    /// the whole image.
    Failed { reason: String },
}

impl CropResult {
    /// The usable rect, if any.
    pub fn rect(&self) -> Option<CropRect> {
        match self {
            CropResult::Detected { rect } | CropResult::Fallback { rect, .. } => Some(*rect),
            CropResult::Failed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Quad {
        Quad([
            Point::new(10, 10),
            Point::new(90, 10),
            Point::new(90, 90),
            Point::new(10, 90),
        ])
    }

    #[test]
    fn ordering_canonicalizes_shuffled_corners() {
        let shuffled = Quad([
            Point::new(90, 90),
            Point::new(10, 10),
            Point::new(10, 90),
            Point::new(90, 10),
        ]);
        let ordered = shuffled.ordered();
        assert_eq!(ordered, square());
    }

    #[test]
    fn ordering_is_idempotent() {
        let once = square().ordered();
        let twice = once.ordered();
        assert_eq!(once, twice);
    }

    #[test]
    fn ordering_handles_skewed_quad() {
        // A mild parallelogram: corners are still distinguishable by the
        // two sort keys.
        let quad = Quad([
            Point::new(100, 15),
            Point::new(20, 10),
            Point::new(15, 95),
            Point::new(105, 100),
        ]);
        let ordered = quad.ordered();
        assert_eq!(ordered.0[0], Point::new(20, 10)); // top-left
        assert_eq!(ordered.0[1], Point::new(100, 15)); // top-right
        assert_eq!(ordered.0[2], Point::new(105, 100)); // bottom-right
        assert_eq!(ordered.0[3], Point::new(15, 95)); // bottom-left
    }

    #[test]
    fn bounding_rect_covers_all_corners() {
        let rect = square().bounding_rect();
        assert_eq!(rect, CropRect::new(10, 10, 80, 80));
    }

    #[test]
    fn shoelace_area_of_square() {
        assert!((square().area() - 6400.0).abs() < 1e-9);
    }

    #[test]
    fn intersect_clips_negative_coordinates() {
        let rect = CropRect::new(-50, -20, 200, 100);
        let clamped = rect.clamp_to(100, 60);
        assert_eq!(clamped, CropRect::new(0, 0, 100, 60));
    }

    #[test]
    fn intersect_outside_bounds_is_degenerate() {
        let rect = CropRect::new(500, 500, 50, 50);
        let clamped = rect.clamp_to(100, 100);
        assert!(clamped.is_degenerate());
    }

    #[test]
    fn expanded_clamps_at_image_edges() {
        let rect = CropRect::new(2, 3, 90, 90);
        let expanded = rect.expanded(5, 100, 100);
        assert_eq!(expanded.x, 0);
        assert_eq!(expanded.y, 0);
        assert!(expanded.x + expanded.width <= 100);
        assert!(expanded.y + expanded.height <= 100);
    }

    #[test]
    fn expanded_interior_rect_grows_by_margin() {
        let rect = CropRect::new(20, 20, 40, 40);
        let expanded = rect.expanded(5, 100, 100);
        assert_eq!(expanded, CropRect::new(15, 15, 50, 50));
    }

    #[test]
    fn crop_result_rect_accessor() {
        let detected = CropResult::Detected {
            rect: CropRect::new(0, 0, 10, 10),
        };
        assert!(detected.rect().is_some());
        let failed = CropResult::Failed {
            reason: "no contours".into(),
        };
        assert!(failed.rect().is_none());
    }
}
