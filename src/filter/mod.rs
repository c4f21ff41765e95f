//! Confidence thresholding and non-maximum suppression.
//!
//! [`filter_detections`] turns raw model output into the final detection set:
//!
//! 1. drop detections whose effective confidence is below the threshold,
//! 2. convert the survivors from center form to corner form,
//! 3. sort by confidence, highest first (stable, so ties keep model order),
//! 4. greedily accept a detection only if its IoU with every detection
//!    accepted so far is below the overlap threshold.
//!
//! Under [`SuppressionPolicy::PerClass`] step 4 only compares detections of
//! the same class. The filter is pure and idempotent: running it again on its
//! own output with the same options returns the same detections.

use serde::{Deserialize, Serialize};

use crate::error::DetbatchError;
use crate::ir::{center_to_corners, Detection, Framed, RawDetection, ReferenceFrame};

/// Default confidence threshold.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.4;
/// Default IoU threshold.
pub const DEFAULT_IOU_THRESHOLD: f64 = 0.45;

/// Whether overlap suppression crosses class boundaries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SuppressionPolicy {
    /// Any two overlapping detections compete, whatever their class.
    #[default]
    ClassAgnostic,
    /// Only detections of the same class suppress each other.
    PerClass,
}

/// Confidence and IoU thresholds as sent to the inference backend.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Thresholds {
    pub confidence: f64,
    pub iou: f64,
}

/// Options for [`filter_detections`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterOptions {
    thresholds: Thresholds,
    pub policy: SuppressionPolicy,
}

impl FilterOptions {
    /// Creates validated filter options.
    ///
    /// # Errors
    /// Returns [`DetbatchError::InvalidThreshold`] if either threshold lies
    /// outside `[0, 1]`.
    pub fn new(
        confidence: f64,
        iou: f64,
        policy: SuppressionPolicy,
    ) -> Result<Self, DetbatchError> {
        check_unit_interval("confidence", confidence)?;
        check_unit_interval("iou", iou)?;
        Ok(Self {
            thresholds: Thresholds { confidence, iou },
            policy,
        })
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.thresholds.confidence
    }

    pub fn iou_threshold(&self) -> f64 {
        self.thresholds.iou
    }
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            thresholds: Thresholds {
                confidence: DEFAULT_CONFIDENCE_THRESHOLD,
                iou: DEFAULT_IOU_THRESHOLD,
            },
            policy: SuppressionPolicy::default(),
        }
    }
}

fn check_unit_interval(name: &'static str, value: f64) -> Result<(), DetbatchError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(DetbatchError::InvalidThreshold { name, value })
    }
}

/// Filters raw detections expressed in `frame`.
///
/// The output is ordered by confidence, highest first, and stays in `frame`.
/// Empty input yields empty output.
///
/// # Errors
/// Returns [`DetbatchError::InvalidBox`] if a detection that passes the
/// confidence threshold has a negative width or height. No partial result is
/// returned in that case.
pub fn filter_detections(
    raw: &[RawDetection],
    frame: ReferenceFrame,
    options: &FilterOptions,
) -> Result<Framed<Detection>, DetbatchError> {
    let threshold = options.confidence_threshold();

    let mut candidates = Vec::with_capacity(raw.len());
    for det in raw {
        let (confidence, class_id) = det.confidence_and_class();
        // NaN fails this comparison and is dropped with the low scores.
        if !(confidence >= threshold) {
            continue;
        }
        let bbox = center_to_corners(&det.center)?;
        candidates.push(Detection::new(bbox, confidence, class_id));
    }

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    Ok(Framed::new(
        frame,
        suppress(candidates, options.iou_threshold(), options.policy),
    ))
}

/// Greedy NMS over detections already sorted by descending confidence.
pub fn suppress(
    sorted: Vec<Detection>,
    iou_threshold: f64,
    policy: SuppressionPolicy,
) -> Vec<Detection> {
    let mut accepted: Vec<Detection> = Vec::with_capacity(sorted.len());

    for candidate in sorted {
        let overlaps = accepted.iter().any(|kept| {
            let competes = match policy {
                SuppressionPolicy::ClassAgnostic => true,
                SuppressionPolicy::PerClass => kept.class_id == candidate.class_id,
            };
            competes && kept.bbox.iou(&candidate.bbox) >= iou_threshold
        });
        if !overlaps {
            accepted.push(candidate);
        }
    }

    accepted
}
