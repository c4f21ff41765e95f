//! YAML pipeline configuration.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Command-line flags override whatever is loaded here.
//!
//! ```yaml
//! conf_thres: 0.4
//! iou_thres: 0.45
//! suppression: class-agnostic   # or per-class
//! show_confidence: false
//! model_frame: { width: 640, height: 640 }
//! font: /usr/share/fonts/truetype/dejavu/DejaVuSans.ttf
//! batch:
//!   result_suffix: _result
//!   export_extension: csv
//!   image_extensions: [jpg, jpeg, png]
//!   workers: 4
//!   fail_fast: false
//! inference:
//!   uri: http://127.0.0.1/invocations
//!   timeout_secs: 30
//!   layout: merged              # or per-class
//!   channel_order: bgr          # or rgb
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::batch::{
    BatchOptions, DEFAULT_EXPORT_EXTENSION, DEFAULT_IMAGE_EXTENSIONS, DEFAULT_RESULT_SUFFIX,
};
use crate::error::DetbatchError;
use crate::filter::{
    FilterOptions, SuppressionPolicy, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD,
};
use crate::infer::{ChannelOrder, PredictionLayout};
use crate::ir::Resolution;

/// Default HTTP inference endpoint.
pub const DEFAULT_INFERENCE_URI: &str = "http://127.0.0.1/invocations";

/// Full pipeline configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub conf_thres: f64,
    pub iou_thres: f64,
    pub suppression: SuppressionPolicy,
    pub show_confidence: bool,
    /// Input resolution of the model; detections are expressed in it.
    pub model_frame: Resolution,
    /// Font for label tags. Without one only boxes are drawn.
    pub font: Option<PathBuf>,
    pub box_thickness: u32,
    pub font_size: f32,
    pub batch: BatchConfig,
    pub inference: InferenceConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            conf_thres: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_thres: DEFAULT_IOU_THRESHOLD,
            suppression: SuppressionPolicy::default(),
            show_confidence: false,
            model_frame: Resolution::new(640, 640),
            font: None,
            box_thickness: 2,
            font_size: 20.0,
            batch: BatchConfig::default(),
            inference: InferenceConfig::default(),
        }
    }
}

/// Batch archive settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    pub result_suffix: String,
    pub export_extension: String,
    pub image_extensions: Vec<String>,
    pub workers: usize,
    pub fail_fast: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            result_suffix: DEFAULT_RESULT_SUFFIX.to_string(),
            export_extension: DEFAULT_EXPORT_EXTENSION.to_string(),
            image_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            workers: 1,
            fail_fast: false,
        }
    }
}

/// HTTP inference client settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceConfig {
    pub uri: String,
    /// Per-request timeout; `None` waits forever.
    pub timeout_secs: Option<u64>,
    pub layout: PredictionLayout,
    pub channel_order: ChannelOrder,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_INFERENCE_URI.to_string(),
            timeout_secs: Some(30),
            layout: PredictionLayout::default(),
            channel_order: ChannelOrder::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads and validates a YAML config file.
    pub fn from_yaml_path(path: &Path) -> Result<Self, DetbatchError> {
        let data = fs::read_to_string(path).map_err(DetbatchError::Io)?;
        Self::from_yaml_str(&data, path)
    }

    /// Parses and validates YAML text. `path` is only used in errors.
    pub fn from_yaml_str(data: &str, path: &Path) -> Result<Self, DetbatchError> {
        // serde_yaml rejects an empty document; treat it as all defaults.
        let config: PipelineConfig = if data.trim().is_empty() {
            PipelineConfig::default()
        } else {
            serde_yaml::from_str(data).map_err(|source| DetbatchError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?
        };
        config.validate(path)?;
        Ok(config)
    }

    /// Checks values that parse but cannot be used.
    pub fn validate(&self, path: &Path) -> Result<(), DetbatchError> {
        let invalid = |message: String| DetbatchError::ConfigInvalid {
            path: path.to_path_buf(),
            message,
        };

        self.filter_options()
            .map_err(|err| invalid(err.to_string()))?;

        if self.model_frame.is_empty() {
            return Err(invalid(format!(
                "model_frame must be non-empty, got {}",
                self.model_frame
            )));
        }
        if self.batch.image_extensions.is_empty() {
            return Err(invalid("batch.image_extensions must not be empty".to_string()));
        }
        if self.batch.export_extension.trim_start_matches('.').is_empty() {
            return Err(invalid("batch.export_extension must not be empty".to_string()));
        }
        if self.batch.result_suffix.contains('/') || self.batch.export_extension.contains('/') {
            return Err(invalid(
                "batch.result_suffix and batch.export_extension must not contain '/'".to_string(),
            ));
        }
        if !(self.font_size.is_finite() && self.font_size > 0.0) {
            return Err(invalid(format!("font_size must be positive, got {}", self.font_size)));
        }
        Ok(())
    }

    pub fn filter_options(&self) -> Result<FilterOptions, DetbatchError> {
        FilterOptions::new(self.conf_thres, self.iou_thres, self.suppression)
    }

    pub fn batch_options(&self) -> Result<BatchOptions, DetbatchError> {
        Ok(BatchOptions {
            filter: self.filter_options()?,
            result_suffix: self.batch.result_suffix.clone(),
            export_extension: self.batch.export_extension.clone(),
            image_extensions: self.batch.image_extensions.clone(),
            workers: self.batch.workers,
            fail_fast: self.batch.fail_fast,
        })
    }
}
