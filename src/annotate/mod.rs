//! Rescaling and rendering of detections onto images.
//!
//! [`Annotator::annotate`] always rescales the boxes from their reference
//! frame to the image's native resolution. In [`RenderMode::Render`] it also
//! draws them on a copy of the image; in [`RenderMode::DetectionsOnly`] no
//! pixel work happens at all, which is what batch export uses.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::debug;

use crate::error::DetbatchError;
use crate::ir::{rescale, BoxRecord, Framed, ReferenceFrame, Resolution};

const DEFAULT_THICKNESS: u32 = 2;
const DEFAULT_FONT_SIZE: f32 = 20.0;
const LABEL_PADDING: u32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

// One color per class id, cycling.
const PALETTE: [[u8; 3]; 10] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [52, 69, 147],
    [100, 115, 255],
];

/// Whether to draw or only rescale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderMode {
    #[default]
    Render,
    DetectionsOnly,
}

/// Result of [`Annotator::annotate`].
#[derive(Clone, Debug)]
pub struct Annotated<T> {
    /// The annotated copy; `None` in [`RenderMode::DetectionsOnly`].
    pub image: Option<RgbImage>,
    /// Records rescaled to the image's native resolution.
    pub records: Framed<T>,
}

/// Draws boxes and optional labels.
#[derive(Clone)]
pub struct Annotator {
    font: Option<FontArc>,
    thickness: u32,
    font_size: f32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            thickness: DEFAULT_THICKNESS,
            font_size: DEFAULT_FONT_SIZE,
        }
    }
}

impl std::fmt::Debug for Annotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator")
            .field("font", &self.font.is_some())
            .field("thickness", &self.thickness)
            .field("font_size", &self.font_size)
            .finish()
    }
}

impl Annotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `font` for label tags. Without a font only boxes are drawn.
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn with_thickness(mut self, thickness: u32) -> Self {
        self.thickness = thickness.max(1);
        self
    }

    pub fn with_font_size(mut self, font_size: f32) -> Self {
        self.font_size = font_size;
        self
    }

    /// Loads a TrueType/OpenType font file for label tags.
    pub fn load_font(path: &Path) -> Result<FontArc, DetbatchError> {
        let data = std::fs::read(path).map_err(DetbatchError::Io)?;
        FontArc::try_from_vec(data).map_err(|e| DetbatchError::FontLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Rescales `records` to `image` and, in [`RenderMode::Render`], draws
    /// them on a copy of `image`. The caller's image is never modified.
    pub fn annotate<T: BoxRecord>(
        &self,
        records: &Framed<T>,
        image: &RgbImage,
        show_confidence: bool,
        mode: RenderMode,
    ) -> Annotated<T> {
        let target = Resolution::of_image(image);
        let rescaled = rescale_records(records, target);

        let image = match mode {
            RenderMode::DetectionsOnly => None,
            RenderMode::Render => {
                let mut canvas = image.clone();
                if self.font.is_none() && !rescaled.is_empty() {
                    debug!("no font configured; drawing boxes without label tags");
                }
                for record in &rescaled.items {
                    self.draw_record(&mut canvas, record, show_confidence);
                }
                Some(canvas)
            }
        };

        Annotated {
            image,
            records: rescaled,
        }
    }

    fn draw_record<T: BoxRecord>(&self, canvas: &mut RgbImage, record: &T, show_confidence: bool) {
        let (w, h) = canvas.dimensions();
        if w == 0 || h == 0 {
            return;
        }

        let px = record.bbox().round_to_pixels();
        let max_x = w as i64 - 1;
        let max_y = h as i64 - 1;
        if px.x2 < 0 || px.y2 < 0 || px.x1 > max_x || px.y1 > max_y {
            return;
        }

        let x1 = px.x1.clamp(0, max_x) as i32;
        let y1 = px.y1.clamp(0, max_y) as i32;
        let x2 = px.x2.clamp(0, max_x) as i32;
        let y2 = px.y2.clamp(0, max_y) as i32;
        if x2 < x1 || y2 < y1 {
            return;
        }

        let color = class_color(record);

        // Thicker borders grow inwards until the box is filled.
        for t in 0..self.thickness as i32 {
            let (ix1, iy1, ix2, iy2) = (x1 + t, y1 + t, x2 - t, y2 - t);
            if ix2 < ix1 || iy2 < iy1 {
                break;
            }
            let rect = Rect::at(ix1, iy1).of_size((ix2 - ix1 + 1) as u32, (iy2 - iy1 + 1) as u32);
            draw_hollow_rect_mut(canvas, rect, color);
        }

        if let Some(font) = &self.font {
            let label = label_text(record, show_confidence);
            self.draw_label(canvas, font, &label, x1, y1, color);
        }
    }

    fn draw_label(
        &self,
        canvas: &mut RgbImage,
        font: &FontArc,
        label: &str,
        x: i32,
        box_top: i32,
        color: Rgb<u8>,
    ) {
        let scale = PxScale::from(self.font_size);
        let (text_w, text_h) = text_size(scale, font, label);
        let tag_w = text_w + 2 * LABEL_PADDING;
        let tag_h = text_h + 2 * LABEL_PADDING;

        let available_w = canvas.width().saturating_sub(x.max(0) as u32);
        let tag_w = tag_w.min(available_w);
        if tag_w == 0 || tag_h == 0 {
            return;
        }

        // Above the box when there is room, otherwise inside its top edge.
        let tag_y = (box_top - tag_h as i32).max(0);
        draw_filled_rect_mut(canvas, Rect::at(x, tag_y).of_size(tag_w, tag_h), color);
        draw_text_mut(
            canvas,
            TEXT_COLOR,
            x + LABEL_PADDING as i32,
            tag_y + LABEL_PADDING as i32,
            scale,
            font,
            label,
        );
    }
}

/// Rescales every record from its frame to `target`.
pub fn rescale_records<T: BoxRecord>(records: &Framed<T>, target: Resolution) -> Framed<T> {
    let items = records
        .items
        .iter()
        .map(|record| record.with_bbox(rescale(record.bbox(), records.frame, target)))
        .collect();
    Framed::new(ReferenceFrame::Resolution(target), items)
}

fn class_color<T: BoxRecord>(record: &T) -> Rgb<u8> {
    Rgb(PALETTE[record.class_id().as_u32() as usize % PALETTE.len()])
}

fn label_text<T: BoxRecord>(record: &T, show_confidence: bool) -> String {
    if show_confidence {
        format!("{} {:.2}", record.class_id(), record.confidence())
    } else {
        record.class_id().to_string()
    }
}
