//! Reference frames and rescaling between them.
//!
//! Every box coordinate is relative to some resolution: the model's fixed
//! input size, the unit square of a normalized label file, or the native
//! pixel grid of the image being annotated. A [`ReferenceFrame`] names which
//! one, and [`rescale`] moves a box from one frame to a concrete resolution.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::bbox::BBox;

/// A concrete `(width, height)` resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// The unit frame used by normalized coordinates.
    pub const UNIT: Resolution = Resolution {
        width: 1,
        height: 1,
    };

    #[inline]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Resolution of an `image` pixel buffer.
    pub fn of_image<I: image::GenericImageView>(image: &I) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    /// Returns true if either side is zero.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The frame a set of box coordinates is expressed in.
///
/// `Native` replaces the old `(1, 1)` convention for "already in the target
/// image's pixel space". `Resolution(Resolution::UNIT)` is an ordinary frame
/// and scales like any other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReferenceFrame {
    Resolution(Resolution),
    Native,
}

impl ReferenceFrame {
    /// Frame for normalized `[0, 1]` coordinates.
    pub const NORMALIZED: ReferenceFrame = ReferenceFrame::Resolution(Resolution::UNIT);

    #[inline]
    pub fn resolution(width: u32, height: u32) -> Self {
        ReferenceFrame::Resolution(Resolution::new(width, height))
    }
}

impl From<Resolution> for ReferenceFrame {
    fn from(resolution: Resolution) -> Self {
        ReferenceFrame::Resolution(resolution)
    }
}

impl fmt::Display for ReferenceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceFrame::Resolution(res) => write!(f, "{res}"),
            ReferenceFrame::Native => f.write_str("native"),
        }
    }
}

/// Rescales `bbox` from the frame `from` to the resolution `to`.
///
/// x coordinates are multiplied by `to.width / from.width` and y coordinates
/// by `to.height / from.height`. A `Native` source and a source equal to the
/// target both return the box unchanged without any arithmetic. No rounding
/// happens here.
///
/// A zero-sized source resolution produces non-finite coordinates, which
/// callers can detect with [`BBox::is_finite`].
pub fn rescale(bbox: &BBox, from: ReferenceFrame, to: Resolution) -> BBox {
    let from = match from {
        ReferenceFrame::Native => return *bbox,
        ReferenceFrame::Resolution(from) if from == to => return *bbox,
        ReferenceFrame::Resolution(from) => from,
    };

    let sx = to.width as f64 / from.width as f64;
    let sy = to.height as f64 / from.height as f64;

    BBox::from_xyxy(bbox.x1 * sx, bbox.y1 * sy, bbox.x2 * sx, bbox.y2 * sy)
}
