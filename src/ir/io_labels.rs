//! Ground-truth label file reader.
//!
//! Label files are whitespace-delimited text with one box per row:
//!
//! ```text
//! class_id cx cy w h
//! ```
//!
//! `cx`, `cy`, `w` and `h` are normalized to `[0, 1]` relative to the source
//! image's native resolution, so the resulting labels live in
//! [`ReferenceFrame::NORMALIZED`](super::ReferenceFrame::NORMALIZED).
//! Blank lines are ignored; any other row that does not have exactly five
//! columns is an error naming the file and line.

use std::fs;
use std::path::Path;

use super::bbox::{center_to_corners, CenterBox};
use super::frame::ReferenceFrame;
use super::ids::ClassId;
use super::model::{Framed, GroundTruthLabel};
use crate::error::DetbatchError;

/// Reads every label in a label file.
///
/// # Errors
/// Returns [`DetbatchError::Io`] if the file cannot be read and
/// [`DetbatchError::LabelParse`] for the first malformed row.
pub fn read_label_file(path: &Path) -> Result<Framed<GroundTruthLabel>, DetbatchError> {
    let content = fs::read_to_string(path).map_err(DetbatchError::Io)?;
    from_label_str(&content, path)
}

/// Parses label text. `path` is only used in error messages.
pub fn from_label_str(
    content: &str,
    path: &Path,
) -> Result<Framed<GroundTruthLabel>, DetbatchError> {
    let mut labels = Vec::new();
    for (line_idx, line) in content.lines().enumerate() {
        if let Some(label) = parse_label_line(line, path, line_idx + 1)? {
            labels.push(label);
        }
    }
    Ok(Framed::new(ReferenceFrame::NORMALIZED, labels))
}

#[derive(Debug, PartialEq)]
struct LabelRow {
    class_id: u32,
    center: CenterBox,
}

fn parse_label_line(
    line: &str,
    file_path: &Path,
    line_num: usize,
) -> Result<Option<GroundTruthLabel>, DetbatchError> {
    let Some(row) = parse_label_row(line, file_path, line_num)? else {
        return Ok(None);
    };

    let bbox = center_to_corners(&row.center).map_err(|_| DetbatchError::LabelParse {
        path: file_path.to_path_buf(),
        line: line_num,
        message: format!(
            "negative box extent (w={}, h={})",
            row.center.w, row.center.h
        ),
    })?;

    Ok(Some(GroundTruthLabel::new(bbox, ClassId::new(row.class_id))))
}

fn parse_label_row(
    line: &str,
    file_path: &Path,
    line_num: usize,
) -> Result<Option<LabelRow>, DetbatchError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    // Take at most 6 tokens so pathological inputs do not allocate unbounded memory.
    let tokens: Vec<&str> = trimmed.split_whitespace().take(6).collect();

    if tokens.len() != 5 {
        let found = if tokens.len() > 5 {
            "more than 5".to_string()
        } else {
            tokens.len().to_string()
        };
        return Err(DetbatchError::LabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!("expected 5 columns (class_id cx cy w h), found {found}"),
        });
    }

    let class_id = tokens[0]
        .parse::<u32>()
        .map_err(|_| DetbatchError::LabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!(
                "invalid class_id '{}'; expected non-negative integer",
                tokens[0]
            ),
        })?;

    let cx = parse_f64_token(tokens[1], "cx", file_path, line_num)?;
    let cy = parse_f64_token(tokens[2], "cy", file_path, line_num)?;
    let w = parse_f64_token(tokens[3], "w", file_path, line_num)?;
    let h = parse_f64_token(tokens[4], "h", file_path, line_num)?;

    Ok(Some(LabelRow {
        class_id,
        center: CenterBox::new(cx, cy, w, h),
    }))
}

/// Fuzz-only entrypoint for single-line label parsing.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_label_line(input: &str) -> Result<(), DetbatchError> {
    let _ = parse_label_line(input, Path::new("<fuzz>"), 1)?;
    Ok(())
}

fn parse_f64_token(
    raw: &str,
    field_name: &str,
    file_path: &Path,
    line_num: usize,
) -> Result<f64, DetbatchError> {
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| DetbatchError::LabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!("invalid {field_name} '{raw}'; expected a finite number"),
        })
}
