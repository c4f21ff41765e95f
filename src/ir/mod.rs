//! Core representation of boxes, frames and detections.
//!
//! Everything the pipeline passes around is defined here: the corner and
//! center box forms and the conversion between them, the reference frames
//! box coordinates are relative to, the raw and filtered detection records,
//! and the two text formats the pipeline reads and writes (ground-truth label
//! files and the detection export CSV).
//!
//! # Design Principles
//!
//! 1. **Explicit frames**: a set of boxes always travels with the
//!    [`ReferenceFrame`] it is expressed in ([`Framed`]). "No rescale needed"
//!    is the [`ReferenceFrame::Native`] variant, never a magic resolution.
//!
//! 2. **Late rounding**: coordinates stay `f64` through every rescale and
//!    are rounded to integer pixels only when rendered or exported.
//!
//! 3. **Immutable records**: rescaling produces new records via
//!    [`BoxRecord::with_bbox`]; nothing is mutated in place.
//!
//! # Example
//!
//! ```
//! use detbatch::ir::{rescale, CenterBox, ReferenceFrame, Resolution};
//!
//! let bbox = CenterBox::new(320.0, 320.0, 100.0, 100.0).to_corners()?;
//! let scaled = rescale(&bbox, ReferenceFrame::resolution(640, 640), Resolution::new(1280, 1280));
//! assert_eq!(scaled.round_to_pixels().x1, 540);
//! # Ok::<(), detbatch::DetbatchError>(())
//! ```

mod bbox;
mod frame;
mod ids;
pub mod io_export_csv;
pub mod io_labels;
mod model;

// Re-export core types for convenient access
pub use bbox::{center_to_corners, corners_to_center, BBox, CenterBox, PixelBox};
pub use frame::{rescale, ReferenceFrame, Resolution};
pub use ids::ClassId;
pub use model::{BoxRecord, Detection, Framed, GroundTruthLabel, RawDetection, RawScores};
