//! HTTP inference client for MLflow-style `/invocations` endpoints.
//!
//! Request body:
//!
//! ```json
//! {"inputs": [[[b, g, r], ...], ...], "params": {"conf_thres": 0.4, "iou_thres": 0.45}}
//! ```
//!
//! `inputs` is the image as nested rows of pixels in the configured channel
//! order. The server answers `{"predictions": [[...], ...]}` with one row per
//! detection in the model's input frame, laid out per [`PredictionLayout`].
//!
//! Any non-success status, timeout or unparsable body is returned as an
//! [`InferenceError`]; it is never turned into an empty detection list.

use std::time::Duration;

use image::RgbImage;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{parse_prediction_rows, ChannelOrder, Inference, InferenceError, PredictionLayout};
use crate::filter::Thresholds;
use crate::ir::{RawDetection, ReferenceFrame, Resolution};

pub use crate::config::DEFAULT_INFERENCE_URI as DEFAULT_URI;

/// Builder for [`HttpInference`].
#[derive(Clone, Debug)]
pub struct HttpInferenceBuilder {
    uri: String,
    timeout: Option<Duration>,
    model_frame: Resolution,
    layout: PredictionLayout,
    channel_order: ChannelOrder,
}

impl HttpInferenceBuilder {
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model_frame(mut self, model_frame: Resolution) -> Self {
        self.model_frame = model_frame;
        self
    }

    pub fn layout(mut self, layout: PredictionLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn channel_order(mut self, channel_order: ChannelOrder) -> Self {
        self.channel_order = channel_order;
        self
    }

    pub fn build(self) -> HttpInference {
        let config = ureq::Agent::config_builder()
            .timeout_global(self.timeout)
            .build();
        HttpInference {
            agent: config.into(),
            uri: self.uri,
            model_frame: self.model_frame,
            layout: self.layout,
            channel_order: self.channel_order,
        }
    }
}

/// Inference over HTTP.
pub struct HttpInference {
    agent: ureq::Agent,
    uri: String,
    model_frame: Resolution,
    layout: PredictionLayout,
    channel_order: ChannelOrder,
}

impl HttpInference {
    pub fn builder(uri: impl Into<String>) -> HttpInferenceBuilder {
        HttpInferenceBuilder {
            uri: uri.into(),
            timeout: Some(Duration::from_secs(30)),
            model_frame: Resolution::new(640, 640),
            layout: PredictionLayout::default(),
            channel_order: ChannelOrder::default(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

#[derive(Serialize)]
struct InvocationRequest<'a> {
    inputs: PixelRows<'a>,
    params: InvocationParams,
}

#[derive(Serialize)]
struct InvocationParams {
    conf_thres: f64,
    iou_thres: f64,
}

#[derive(Deserialize)]
struct InvocationResponse {
    predictions: Vec<Vec<f64>>,
}

/// Serializes an image as `[[[c0, c1, c2], ...], ...]` without building the
/// nested vectors in memory.
struct PixelRows<'a> {
    image: &'a RgbImage,
    order: ChannelOrder,
}

struct PixelRow<'a> {
    image: &'a RgbImage,
    y: u32,
    order: ChannelOrder,
}

impl Serialize for PixelRows<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.image.height() as usize))?;
        for y in 0..self.image.height() {
            seq.serialize_element(&PixelRow {
                image: self.image,
                y,
                order: self.order,
            })?;
        }
        seq.end()
    }
}

impl Serialize for PixelRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.image.width() as usize))?;
        for x in 0..self.image.width() {
            let [r, g, b] = self.image.get_pixel(x, self.y).0;
            let pixel = match self.order {
                ChannelOrder::Rgb => [r, g, b],
                ChannelOrder::Bgr => [b, g, r],
            };
            seq.serialize_element(&pixel)?;
        }
        seq.end()
    }
}

impl From<ureq::Error> for InferenceError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => InferenceError::Status { code },
            ureq::Error::Timeout(_) => InferenceError::Timeout,
            ureq::Error::Json(e) => InferenceError::Malformed(e.to_string()),
            other => InferenceError::Transport(other.to_string()),
        }
    }
}

impl Inference for HttpInference {
    fn infer(
        &self,
        image: &RgbImage,
        thresholds: &Thresholds,
    ) -> Result<Vec<RawDetection>, InferenceError> {
        let request = InvocationRequest {
            inputs: PixelRows {
                image,
                order: self.channel_order,
            },
            params: InvocationParams {
                conf_thres: thresholds.confidence,
                iou_thres: thresholds.iou,
            },
        };

        debug!(
            uri = %self.uri,
            width = image.width(),
            height = image.height(),
            "posting inference request"
        );
        let mut response = self
            .agent
            .post(&self.uri)
            .send_json(&request)?;

        let body: InvocationResponse = response.body_mut().read_json()?;
        debug!(rows = body.predictions.len(), "inference response received");

        parse_prediction_rows(&body.predictions, self.layout)
    }

    fn reference_frame(&self) -> ReferenceFrame {
        ReferenceFrame::Resolution(self.model_frame)
    }
}
