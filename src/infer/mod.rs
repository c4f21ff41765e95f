//! External collaborators: image decoding and model inference.
//!
//! The pipeline never talks to a model or a codec directly. It receives an
//! [`ImageDecoder`] and an [`Inference`] implementation from the caller and
//! only relies on these traits. An inference call has exactly two outcomes:
//! `Ok(detections)` (possibly empty) or `Err(InferenceError)`. Callers must
//! never treat a failure as "no detections".

#[cfg(feature = "remote")]
pub mod http;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filter::Thresholds;
use crate::ir::{CenterBox, ClassId, RawDetection, ReferenceFrame};

/// Failure to turn archive or file bytes into pixels.
#[derive(Debug, Error)]
#[error("Failed to decode image '{name}': {message}")]
pub struct DecodeError {
    pub name: String,
    pub message: String,
}

/// Failure of an inference call.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Inference request failed with status code {code}")]
    Status { code: u16 },

    #[error("Inference request timed out")]
    Timeout,

    #[error("Inference transport error: {0}")]
    Transport(String),

    #[error("Malformed inference response: {0}")]
    Malformed(String),

    #[error("Inference backend error: {0}")]
    Backend(String),
}

/// Decodes raw bytes into an RGB pixel buffer.
pub trait ImageDecoder: Send + Sync {
    /// `name` is the file or archive entry name, used for format hints and
    /// error messages.
    fn decode(&self, name: &str, bytes: &[u8]) -> Result<RgbImage, DecodeError>;
}

/// A detection model, local or remote.
pub trait Inference: Send + Sync {
    /// Runs the model on `image`.
    ///
    /// Implementations may apply `thresholds` themselves or ignore them; the
    /// pipeline filters the result again either way.
    fn infer(
        &self,
        image: &RgbImage,
        thresholds: &Thresholds,
    ) -> Result<Vec<RawDetection>, InferenceError>;

    /// Frame the returned boxes are expressed in (the model input size).
    fn reference_frame(&self) -> ReferenceFrame;
}

impl<T: Inference + ?Sized> Inference for &T {
    fn infer(
        &self,
        image: &RgbImage,
        thresholds: &Thresholds,
    ) -> Result<Vec<RawDetection>, InferenceError> {
        (**self).infer(image, thresholds)
    }

    fn reference_frame(&self) -> ReferenceFrame {
        (**self).reference_frame()
    }
}

/// Decoder backed by the `image` crate (PNG and JPEG).
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, name: &str, bytes: &[u8]) -> Result<RgbImage, DecodeError> {
        image::load_from_memory(bytes)
            .map(|img| img.to_rgb8())
            .map_err(|e| DecodeError {
                name: name.to_string(),
                message: e.to_string(),
            })
    }
}

/// Order of the three channels when pixels are sent to a model server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    /// OpenCV order, which is what models served next to OpenCV code expect.
    #[default]
    Bgr,
}

/// Column layout of one prediction row returned by a model server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PredictionLayout {
    /// `cx cy w h confidence class_id`
    #[default]
    Merged,
    /// `cx cy w h objectness score_0 score_1 ...`
    PerClass,
}

/// Parses prediction rows into raw detections.
///
/// # Errors
/// Returns [`InferenceError::Malformed`] naming the first row with the wrong
/// number of columns or a class id that is not a non-negative integer.
pub fn parse_prediction_rows(
    rows: &[Vec<f64>],
    layout: PredictionLayout,
) -> Result<Vec<RawDetection>, InferenceError> {
    rows.iter()
        .enumerate()
        .map(|(idx, row)| parse_prediction_row(idx, row, layout))
        .collect()
}

fn parse_prediction_row(
    idx: usize,
    row: &[f64],
    layout: PredictionLayout,
) -> Result<RawDetection, InferenceError> {
    match layout {
        PredictionLayout::Merged => {
            let &[cx, cy, w, h, confidence, class] = row else {
                return Err(InferenceError::Malformed(format!(
                    "prediction {idx}: expected 6 values (cx cy w h confidence class_id), found {}",
                    row.len()
                )));
            };
            if !(class >= 0.0 && class.fract() == 0.0 && class <= u32::MAX as f64) {
                return Err(InferenceError::Malformed(format!(
                    "prediction {idx}: invalid class id {class}"
                )));
            }
            Ok(RawDetection::merged(
                CenterBox::new(cx, cy, w, h),
                confidence,
                ClassId::new(class as u32),
            ))
        }
        PredictionLayout::PerClass => {
            if row.len() < 6 {
                return Err(InferenceError::Malformed(format!(
                    "prediction {idx}: expected at least 6 values \
                     (cx cy w h objectness scores...), found {}",
                    row.len()
                )));
            }
            Ok(RawDetection::per_class(
                CenterBox::new(row[0], row[1], row[2], row[3]),
                row[4],
                row[5..].to_vec(),
            ))
        }
    }
}
