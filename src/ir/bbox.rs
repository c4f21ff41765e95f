//! Bounding box types in corner (XYXY) and center (CXCYWH) form.

use serde::{Deserialize, Serialize};

use crate::error::DetbatchError;

/// An axis-aligned bounding box in corner form `(x1, y1, x2, y2)`.
///
/// Coordinates are floating point and only meaningful together with the
/// [`ReferenceFrame`](super::ReferenceFrame) of the collection the box
/// belongs to. They are kept unrounded through every rescale; use
/// [`BBox::round_to_pixels`] at the point of rendering or export.
#[derive(Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    /// Creates a new bounding box from explicit corner coordinates.
    #[inline]
    pub fn from_xyxy(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Returns the width of the bounding box.
    ///
    /// May be negative if the box is malformed (x2 < x1).
    #[inline]
    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    /// Returns the height of the bounding box.
    ///
    /// May be negative if the box is malformed (y2 < y1).
    #[inline]
    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// Returns the area, clamped at zero for malformed boxes.
    #[inline]
    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Returns true if all coordinates are finite (not NaN or infinite).
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }

    /// Returns true if the box is properly ordered (x1 <= x2 and y1 <= y2).
    #[inline]
    pub fn is_ordered(&self) -> bool {
        self.x1 <= self.x2 && self.y1 <= self.y2
    }

    /// Area of the overlap between two boxes in the same frame.
    pub fn intersection(&self, other: &BBox) -> f64 {
        let w = self.x2.min(other.x2) - self.x1.max(other.x1);
        let h = self.y2.min(other.y2) - self.y1.max(other.y1);
        w.max(0.0) * h.max(0.0)
    }

    /// Intersection-over-Union with another box in the same frame.
    ///
    /// Returns 0.0 when the union is empty (two degenerate boxes).
    pub fn iou(&self, other: &BBox) -> f64 {
        let inter = self.intersection(other);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Converts to center form.
    #[inline]
    pub fn to_center(&self) -> CenterBox {
        corners_to_center(self)
    }

    /// Rounds every coordinate to the nearest integer pixel.
    ///
    /// Halves round away from zero.
    pub fn round_to_pixels(&self) -> PixelBox {
        PixelBox {
            x1: self.x1.round() as i64,
            y1: self.y1.round() as i64,
            x2: self.x2.round() as i64,
            y2: self.y2.round() as i64,
        }
    }
}

impl std::fmt::Debug for BBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BBox")
            .field("x1", &self.x1)
            .field("y1", &self.y1)
            .field("x2", &self.x2)
            .field("y2", &self.y2)
            .finish()
    }
}

/// A box in center form `(cx, cy, w, h)`, as emitted by YOLO-style heads
/// and stored in label files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CenterBox {
    pub cx: f64,
    pub cy: f64,
    pub w: f64,
    pub h: f64,
}

impl CenterBox {
    #[inline]
    pub fn new(cx: f64, cy: f64, w: f64, h: f64) -> Self {
        Self { cx, cy, w, h }
    }

    /// Converts to corner form. See [`center_to_corners`].
    #[inline]
    pub fn to_corners(&self) -> Result<BBox, DetbatchError> {
        center_to_corners(self)
    }
}

/// Converts a center box to corner form.
///
/// # Errors
/// Returns [`DetbatchError::InvalidBox`] if the width or height is negative
/// or not a number.
pub fn center_to_corners(center: &CenterBox) -> Result<BBox, DetbatchError> {
    // NaN compares false with everything, so test for the valid range.
    if !(center.w >= 0.0 && center.h >= 0.0) {
        return Err(DetbatchError::InvalidBox {
            width: center.w,
            height: center.h,
        });
    }

    let half_w = center.w / 2.0;
    let half_h = center.h / 2.0;
    Ok(BBox::from_xyxy(
        center.cx - half_w,
        center.cy - half_h,
        center.cx + half_w,
        center.cy + half_h,
    ))
}

/// Converts a corner box back to center form.
pub fn corners_to_center(bbox: &BBox) -> CenterBox {
    CenterBox {
        cx: (bbox.x1 + bbox.x2) / 2.0,
        cy: (bbox.y1 + bbox.y2) / 2.0,
        w: bbox.width(),
        h: bbox.height(),
    }
}

/// A box rounded to integer pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelBox {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}
