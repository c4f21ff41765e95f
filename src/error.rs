use std::path::PathBuf;
use thiserror::Error;

use crate::batch::BatchReport;
use crate::infer::{DecodeError, InferenceError};

/// The main error type for detbatch operations.
#[derive(Debug, Error)]
pub enum DetbatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid box: width {width} and height {height} must be non-negative")]
    InvalidBox { width: f64, height: f64 },

    #[error("Invalid {name} threshold {value} (must be within [0, 1])")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("Failed to parse label file {path} at line {line}: {message}")]
    LabelParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Failed to write export CSV {path}: {source}")]
    ExportCsvWrite {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to parse export CSV {path}: {source}")]
    ExportCsvParse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Invalid export CSV {path}: {message}")]
    ExportCsvInvalid { path: PathBuf, message: String },

    #[error("Failed to read archive {path}: {source}")]
    ArchiveRead {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to write archive entry '{entry}': {source}")]
    ArchiveWrite {
        entry: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid config {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    #[error("Failed to write image {path}: {source}")]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to read image dimensions from {path}: {source}")]
    ImageDimensionRead {
        path: PathBuf,
        #[source]
        source: imagesize::ImageError,
    },

    #[error("Failed to load font {path}: {message}")]
    FontLoad { path: PathBuf, message: String },

    #[error("Failed to serialize report: {0}")]
    ReportSerialize(#[source] serde_json::Error),

    #[error("Inference backend unavailable: {0}")]
    InferenceUnavailable(String),

    #[error(
        "Batch incomplete: {failed} of {total} image(s) failed, {skipped} not processed",
        failed = .report.failed_count(),
        total = .report.total,
        skipped = .report.not_processed()
    )]
    BatchIncomplete { report: Box<BatchReport> },
}
