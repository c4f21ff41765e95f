//! Ground truth and inference, side by side.
//!
//! The two sides are annotated independently, each from its own frame, and
//! are never merged into one detection set.

use std::path::Path;

use image::RgbImage;

use crate::annotate::{Annotated, Annotator, RenderMode};
use crate::error::DetbatchError;
use crate::ir::io_labels::read_label_file;
use crate::ir::{Detection, Framed, GroundTruthLabel};
use crate::pipeline::Pipeline;

/// Independently annotated ground truth and inference for one image.
#[derive(Clone, Debug)]
pub struct Comparison {
    pub ground_truth: Annotated<GroundTruthLabel>,
    pub inferred: Annotated<Detection>,
}

impl Comparison {
    /// Number of labels and detections, in that order.
    pub fn counts(&self) -> (usize, usize) {
        (self.ground_truth.records.len(), self.inferred.records.len())
    }
}

/// Annotates `labels` and the pipeline's detections on two copies of `image`.
pub fn compare(
    image: &RgbImage,
    labels: &Framed<GroundTruthLabel>,
    pipeline: &Pipeline<'_>,
    annotator: &Annotator,
    show_confidence: bool,
) -> Result<Comparison, DetbatchError> {
    // Labels carry a fixed confidence, so only the inferred side shows scores.
    let ground_truth = annotator.annotate(labels, image, false, RenderMode::Render);
    let inferred = pipeline.annotate(image, annotator, show_confidence)?;
    Ok(Comparison {
        ground_truth,
        inferred,
    })
}

/// Reads the label file at `label_path` and runs [`compare`].
pub fn compare_with_label_file(
    image: &RgbImage,
    label_path: &Path,
    pipeline: &Pipeline<'_>,
    annotator: &Annotator,
    show_confidence: bool,
) -> Result<Comparison, DetbatchError> {
    let labels = read_label_file(label_path)?;
    compare(image, &labels, pipeline, annotator, show_confidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterOptions, Thresholds};
    use crate::infer::{Inference, InferenceError};
    use crate::ir::io_labels::from_label_str;
    use crate::ir::{BBox, CenterBox, RawDetection, ReferenceFrame};
    use std::io::Write;

    struct OneBox;

    impl Inference for OneBox {
        fn infer(&self, _: &RgbImage, _: &Thresholds) -> Result<Vec<RawDetection>, InferenceError> {
            Ok(vec![RawDetection::merged(
                CenterBox::new(320.0, 320.0, 100.0, 100.0),
                0.9,
                1,
            )])
        }

        fn reference_frame(&self) -> ReferenceFrame {
            ReferenceFrame::resolution(640, 640)
        }
    }

    #[test]
    fn sides_are_annotated_independently() {
        let image = RgbImage::new(1280, 1280);
        let labels = from_label_str("0 0.5 0.5 0.25 0.25\n", Path::new("a.txt")).expect("labels");
        let pipeline = Pipeline::new(&OneBox, FilterOptions::default());

        let cmp = compare(&image, &labels, &pipeline, &Annotator::new(), true).expect("compare");

        assert_eq!(cmp.counts(), (1, 1));
        assert_eq!(
            cmp.ground_truth.records.items[0].bbox,
            BBox::from_xyxy(480.0, 480.0, 800.0, 800.0)
        );
        assert_eq!(
            cmp.inferred.records.items[0].bbox,
            BBox::from_xyxy(540.0, 540.0, 740.0, 740.0)
        );
        assert!(cmp.ground_truth.image.is_some());
        assert!(cmp.inferred.image.is_some());
    }

    #[test]
    fn malformed_label_file_names_path_and_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.txt");
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(file, "0 0.5 0.5 0.1 0.1").expect("write");
        writeln!(file, "1 0.5 0.5").expect("write");

        let pipeline = Pipeline::new(&OneBox, FilterOptions::default());
        let err = compare_with_label_file(
            &RgbImage::new(4, 4),
            &path,
            &pipeline,
            &Annotator::new(),
            false,
        )
        .unwrap_err();

        match err {
            DetbatchError::LabelParse { path: p, line, .. } => {
                assert_eq!(p, path);
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
