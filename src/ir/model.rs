//! Detection records flowing through the pipeline.
//!
//! A [`RawDetection`] is what the model hands back, in center form and in the
//! model's reference frame. The filter turns the survivors into
//! [`Detection`]s; label files produce [`GroundTruthLabel`]s. Both implement
//! [`BoxRecord`], which is all the annotator and exporter need to know.

use serde::{Deserialize, Serialize};

use super::bbox::{BBox, CenterBox};
use super::frame::ReferenceFrame;
use super::ids::ClassId;

/// Scores attached to a raw detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawScores {
    /// Objectness plus one score per class (YOLOv5-style heads).
    PerClass {
        objectness: f64,
        class_scores: Vec<f64>,
    },
    /// A single confidence already merged with the best class.
    Merged { confidence: f64, class_id: ClassId },
}

/// Unfiltered model output in the model's reference frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub center: CenterBox,
    pub scores: RawScores,
}

impl RawDetection {
    /// Creates a raw detection with a merged confidence.
    pub fn merged(center: CenterBox, confidence: f64, class_id: impl Into<ClassId>) -> Self {
        Self {
            center,
            scores: RawScores::Merged {
                confidence,
                class_id: class_id.into(),
            },
        }
    }

    /// Creates a raw detection with objectness and per-class scores.
    pub fn per_class(center: CenterBox, objectness: f64, class_scores: Vec<f64>) -> Self {
        Self {
            center,
            scores: RawScores::PerClass {
                objectness,
                class_scores,
            },
        }
    }

    /// Effective confidence and class.
    ///
    /// For per-class scores this is `objectness * max(class_scores)` with the
    /// first maximal class winning ties. An empty score vector yields the
    /// objectness and class 0.
    pub fn confidence_and_class(&self) -> (f64, ClassId) {
        match &self.scores {
            RawScores::Merged {
                confidence,
                class_id,
            } => (*confidence, *class_id),
            RawScores::PerClass {
                objectness,
                class_scores,
            } => {
                let mut best: Option<(usize, f64)> = None;
                for (idx, &score) in class_scores.iter().enumerate() {
                    if best.map_or(true, |(_, b)| score > b) {
                        best = Some((idx, score));
                    }
                }
                match best {
                    Some((idx, score)) => (objectness * score, ClassId::new(idx as u32)),
                    None => (*objectness, ClassId::default()),
                }
            }
        }
    }
}

/// A filtered detection.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f64,
    pub class_id: ClassId,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f64, class_id: impl Into<ClassId>) -> Self {
        Self {
            bbox,
            confidence,
            class_id: class_id.into(),
        }
    }
}

/// A stored annotation, normalized to the unit square of its source image.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthLabel {
    pub bbox: BBox,
    pub class_id: ClassId,
}

impl GroundTruthLabel {
    /// Ground truth is certain by definition.
    pub const CONFIDENCE: f64 = 1.0;

    /// Frame label boxes are expressed in.
    pub const FRAME: ReferenceFrame = ReferenceFrame::NORMALIZED;

    pub fn new(bbox: BBox, class_id: impl Into<ClassId>) -> Self {
        Self {
            bbox,
            class_id: class_id.into(),
        }
    }
}

/// Common view over detections and ground-truth labels.
pub trait BoxRecord: Clone {
    /// Whether exported rows carry a confidence column.
    const EXPORTS_CONFIDENCE: bool;

    fn bbox(&self) -> &BBox;
    fn class_id(&self) -> ClassId;
    fn confidence(&self) -> f64;

    /// A copy of this record with a different box.
    fn with_bbox(&self, bbox: BBox) -> Self;
}

impl BoxRecord for Detection {
    const EXPORTS_CONFIDENCE: bool = true;

    fn bbox(&self) -> &BBox {
        &self.bbox
    }

    fn class_id(&self) -> ClassId {
        self.class_id
    }

    fn confidence(&self) -> f64 {
        self.confidence
    }

    fn with_bbox(&self, bbox: BBox) -> Self {
        Self { bbox, ..*self }
    }
}

impl BoxRecord for GroundTruthLabel {
    const EXPORTS_CONFIDENCE: bool = false;

    fn bbox(&self) -> &BBox {
        &self.bbox
    }

    fn class_id(&self) -> ClassId {
        self.class_id
    }

    fn confidence(&self) -> f64 {
        Self::CONFIDENCE
    }

    fn with_bbox(&self, bbox: BBox) -> Self {
        Self { bbox, ..*self }
    }
}

/// Records paired with the frame their boxes are expressed in.
#[derive(Clone, Debug, PartialEq)]
pub struct Framed<T> {
    pub frame: ReferenceFrame,
    pub items: Vec<T>,
}

impl<T> Framed<T> {
    pub fn new(frame: ReferenceFrame, items: Vec<T>) -> Self {
        Self { frame, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
