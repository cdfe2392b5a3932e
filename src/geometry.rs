//! Axis-aligned boxes and intersection-over-union.

use serde::{Deserialize, Serialize};

/// IoU at or above which a localization counts as correct.
pub const IOU_CORRECT_THRESHOLD: f64 = 0.5;

/// Bounding box as top-left corner plus width and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub w: f64,
    /// Height.
    pub h: f64,
}

impl BBox {
    /// Box from top-left corner and size.
    #[must_use]
    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Box from a particle location vector `[x, y, w, h]`.
    #[must_use]
    pub const fn from_array(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }

    /// Particle location vector `[x, y, w, h]`.
    #[must_use]
    pub const fn to_array(self) -> [f64; 4] {
        [self.x, self.y, self.w, self.h]
    }

    /// Box from `[x1, y1, x2, y2]` corners.
    #[must_use]
    pub fn from_corners(c: [f64; 4]) -> Self {
        Self::new(c[0], c[1], c[2] - c[0], c[3] - c[1])
    }

    /// `[x1, y1, x2, y2]`.
    #[must_use]
    pub fn corners(self) -> [f64; 4] {
        [self.x, self.y, self.x + self.w, self.y + self.h]
    }

    /// Width times height.
    #[must_use]
    pub fn area(self) -> f64 {
        self.w * self.h
    }
}

/// IoU between two boxes.
///
/// Boxes that do not overlap (including ones that only touch) score exactly
/// `0.0`. A non-positive union also yields `0.0`.
#[must_use]
pub fn calc_frame_iou(a: BBox, b: BBox) -> f64 {
    let [ax1, ay1, ax2, ay2] = a.corners();
    let [bx1, by1, bx2, by2] = b.corners();

    let ix1 = ax1.max(bx1);
    let iy1 = ay1.max(by1);
    let ix2 = ax2.min(bx2);
    let iy2 = ay2.min(by2);
    if ix1 >= ix2 || iy1 >= iy2 {
        return 0.0;
    }

    let intersection = (ix2 - ix1) * (iy2 - iy1);
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 || !union.is_finite() {
        return 0.0;
    }
    intersection / union
}

/// IoU of `reference` against every candidate, in candidate order.
#[must_use]
pub fn compute_all_ious(reference: BBox, candidates: &[BBox]) -> Vec<f64> {
    candidates
        .iter()
        .map(|candidate| calc_frame_iou(reference, *candidate))
        .collect()
}
