//! Detection export CSV writer and reader.
//!
//! One export file holds the boxes of a single image in the image's native
//! pixel space:
//!
//! ```text
//! class_id,confidence,x1,y1,x2,y2
//! 0,0.91,540,304,740,416
//! ```
//!
//! Ground-truth exports omit the `confidence` column. Coordinates are rounded
//! to the nearest pixel here and nowhere earlier. Row order follows the input
//! order, which for detections is already confidence-descending.
//!
//! The header is always written, so an image with no detections produces a
//! header-only file rather than an empty one.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ids::ClassId;
use super::model::BoxRecord;
use crate::error::DetbatchError;

const SCORED_HEADER: [&str; 6] = ["class_id", "confidence", "x1", "y1", "x2", "y2"];
const LABEL_HEADER: [&str; 5] = ["class_id", "x1", "y1", "x2", "y2"];

/// One exported row.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExportRecord {
    pub class_id: ClassId,
    pub confidence: Option<f64>,
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScoredRow {
    class_id: u32,
    confidence: f64,
    x1: i64,
    y1: i64,
    x2: i64,
    y2: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LabelRow {
    class_id: u32,
    x1: i64,
    y1: i64,
    x2: i64,
    y2: i64,
}

/// Flattens records into export rows, one per input item, preserving order.
///
/// The boxes must already be in the target image's pixel space.
pub fn to_export_records<T: BoxRecord>(items: &[T]) -> Vec<ExportRecord> {
    items
        .iter()
        .map(|item| {
            let px = item.bbox().round_to_pixels();
            ExportRecord {
                class_id: item.class_id(),
                confidence: T::EXPORTS_CONFIDENCE.then(|| item.confidence()),
                x1: px.x1,
                y1: px.y1,
                x2: px.x2,
                y2: px.y2,
            }
        })
        .collect()
}

/// Writes an export CSV file for `items`.
pub fn write_export_csv<T: BoxRecord>(path: &Path, items: &[T]) -> Result<(), DetbatchError> {
    let file = File::create(path).map_err(DetbatchError::Io)?;
    let writer = write_rows(BufWriter::new(file), items, path)?;
    writer
        .into_inner()
        .map_err(|e| DetbatchError::Io(e.into_error()))?
        .flush()
        .map_err(DetbatchError::Io)
}

/// Serializes `items` to export CSV bytes.
pub fn to_export_csv_bytes<T: BoxRecord>(items: &[T]) -> Result<Vec<u8>, DetbatchError> {
    let dummy_path = Path::new("<bytes>");
    write_rows(Vec::new(), items, dummy_path)?
        .into_inner()
        .map_err(|e| DetbatchError::Io(e.into_error()))
}

/// Serializes `items` to an export CSV string.
///
/// Useful for testing without file I/O.
pub fn to_export_csv_string<T: BoxRecord>(items: &[T]) -> Result<String, DetbatchError> {
    let bytes = to_export_csv_bytes(items)?;
    String::from_utf8(bytes).map_err(|e| DetbatchError::ExportCsvInvalid {
        path: Path::new("<string>").to_path_buf(),
        message: format!("Invalid UTF-8 in output: {}", e),
    })
}

/// Reads export rows back from a CSV string.
pub fn from_export_csv_str(csv_str: &str) -> Result<Vec<ExportRecord>, DetbatchError> {
    from_export_csv_slice(csv_str.as_bytes())
}

/// Reads export rows back from CSV bytes.
///
/// The schema (with or without `confidence`) is taken from the header.
pub fn from_export_csv_slice(bytes: &[u8]) -> Result<Vec<ExportRecord>, DetbatchError> {
    let dummy_path = Path::new("<bytes>");
    let mut csv_reader = csv::Reader::from_reader(bytes);

    let headers = csv_reader
        .headers()
        .map_err(|source| DetbatchError::ExportCsvParse {
            path: dummy_path.to_path_buf(),
            source,
        })?
        .clone();
    let columns: Vec<&str> = headers.iter().collect();

    let mut records = Vec::new();
    if columns == SCORED_HEADER {
        for result in csv_reader.deserialize() {
            let row: ScoredRow = result.map_err(|source| DetbatchError::ExportCsvParse {
                path: dummy_path.to_path_buf(),
                source,
            })?;
            records.push(ExportRecord {
                class_id: ClassId::new(row.class_id),
                confidence: Some(row.confidence),
                x1: row.x1,
                y1: row.y1,
                x2: row.x2,
                y2: row.y2,
            });
        }
    } else if columns == LABEL_HEADER {
        for result in csv_reader.deserialize() {
            let row: LabelRow = result.map_err(|source| DetbatchError::ExportCsvParse {
                path: dummy_path.to_path_buf(),
                source,
            })?;
            records.push(ExportRecord {
                class_id: ClassId::new(row.class_id),
                confidence: None,
                x1: row.x1,
                y1: row.y1,
                x2: row.x2,
                y2: row.y2,
            });
        }
    } else {
        return Err(DetbatchError::ExportCsvInvalid {
            path: dummy_path.to_path_buf(),
            message: format!("unrecognized header '{}'", columns.join(",")),
        });
    }

    Ok(records)
}

/// Header row for a record type.
pub fn export_header<T: BoxRecord>() -> &'static [&'static str] {
    if T::EXPORTS_CONFIDENCE {
        &SCORED_HEADER
    } else {
        &LABEL_HEADER
    }
}

fn write_rows<W: Write, T: BoxRecord>(
    writer: W,
    items: &[T],
    path: &Path,
) -> Result<csv::Writer<W>, DetbatchError> {
    // Headers are written by hand so that zero rows still yield a header line.
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    let write_err = |source| DetbatchError::ExportCsvWrite {
        path: path.to_path_buf(),
        source,
    };

    csv_writer
        .write_record(export_header::<T>())
        .map_err(write_err)?;

    for record in to_export_records(items) {
        let result = match record.confidence {
            Some(confidence) => csv_writer.serialize(ScoredRow {
                class_id: record.class_id.as_u32(),
                confidence,
                x1: record.x1,
                y1: record.y1,
                x2: record.x2,
                y2: record.y2,
            }),
            None => csv_writer.serialize(LabelRow {
                class_id: record.class_id.as_u32(),
                x1: record.x1,
                y1: record.y1,
                x2: record.x2,
                y2: record.y2,
            }),
        };
        result.map_err(write_err)?;
    }

    Ok(csv_writer)
}
