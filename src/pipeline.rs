//! Single-image path: infer, filter, then rescale or render.

use image::RgbImage;
use tracing::debug;

use crate::annotate::{Annotated, Annotator, RenderMode};
use crate::error::DetbatchError;
use crate::filter::{filter_detections, FilterOptions};
use crate::infer::Inference;
use crate::ir::{Detection, Framed};

/// An inference backend plus the options used to filter its output.
///
/// The backend is borrowed, so one model handle can serve many pipelines and
/// threads at once.
#[derive(Clone, Copy)]
pub struct Pipeline<'a> {
    inference: &'a dyn Inference,
    options: FilterOptions,
}

impl<'a> Pipeline<'a> {
    pub fn new(inference: &'a dyn Inference, options: FilterOptions) -> Self {
        Self { inference, options }
    }

    pub fn options(&self) -> &FilterOptions {
        &self.options
    }

    /// Filtered detections in the model's reference frame.
    ///
    /// # Errors
    /// Inference failures are returned as [`DetbatchError::Inference`], never
    /// as an empty result.
    pub fn detect(&self, image: &RgbImage) -> Result<Framed<Detection>, DetbatchError> {
        let raw = self.inference.infer(image, &self.options.thresholds())?;
        let frame = self.inference.reference_frame();
        let filtered = filter_detections(&raw, frame, &self.options)?;
        debug!(
            raw = raw.len(),
            kept = filtered.len(),
            frame = %frame,
            "filtered detections"
        );
        Ok(filtered)
    }

    /// Filtered detections rescaled to the image's own resolution.
    pub fn detect_native(&self, image: &RgbImage) -> Result<Framed<Detection>, DetbatchError> {
        let detections = self.detect(image)?;
        Ok(Annotator::new()
            .annotate(&detections, image, false, RenderMode::DetectionsOnly)
            .records)
    }

    /// Detects and draws on a copy of `image`.
    pub fn annotate(
        &self,
        image: &RgbImage,
        annotator: &Annotator,
        show_confidence: bool,
    ) -> Result<Annotated<Detection>, DetbatchError> {
        let detections = self.detect(image)?;
        Ok(annotator.annotate(&detections, image, show_confidence, RenderMode::Render))
    }
}
