#![allow(dead_code)]

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use detbatch::filter::Thresholds;
use detbatch::infer::{Inference, InferenceError};
use detbatch::ir::{CenterBox, RawDetection, ReferenceFrame};
use image::{ImageFormat, RgbImage};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    RgbImage::new(width, height)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

pub fn write_png(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, png_bytes(width, height)).expect("write png file");
}

/// Builds a zip archive holding `entries` in the given order.
pub fn zip_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default())
            .expect("start entry");
        zip.write_all(data).expect("write entry");
    }
    zip.finish().expect("finish archive").into_inner()
}

/// Reads every entry of an archive as `(name, utf-8 contents)`, in order.
pub fn read_zip(bytes: &[u8]) -> Vec<(String, String)> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("open archive");
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).expect("entry");
            let mut content = String::new();
            file.read_to_string(&mut content).expect("read entry");
            (file.name().to_string(), content)
        })
        .collect()
}

/// Inference backed by a closure, in a 640x640 model frame.
pub struct FnInference<F>(pub F);

impl<F> FnInference<F>
where
    F: Fn(&RgbImage) -> Result<Vec<RawDetection>, InferenceError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

/// Returns [`centered_detection`] for every image.
pub fn one_detection_each() -> impl Inference {
    FnInference::new(|_| Ok(vec![centered_detection()]))
}

impl<F> Inference for FnInference<F>
where
    F: Fn(&RgbImage) -> Result<Vec<RawDetection>, InferenceError> + Send + Sync,
{
    fn infer(
        &self,
        image: &RgbImage,
        _thresholds: &Thresholds,
    ) -> Result<Vec<RawDetection>, InferenceError> {
        (self.0)(image)
    }

    fn reference_frame(&self) -> ReferenceFrame {
        ReferenceFrame::resolution(640, 640)
    }
}

/// One confident detection centered in the model frame.
pub fn centered_detection() -> RawDetection {
    RawDetection::merged(CenterBox::new(320.0, 320.0, 100.0, 100.0), 0.9, 0)
}
