//! Evidence frame annotation: vehicle boxes and a label banner.

use std::path::Path;

use crashwatch_models::Detection;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Banner text drawn on the annotated evidence frame.
pub const ANNOTATION_LABEL: &str = "ACCIDENT DETECTION";

/// Font used for the banner when none is configured.
pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf";

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: u32 = 3;
const LABEL_SCALE: f32 = 16.0;
const BANNER_PADDING: i32 = 3;

/// Draws vehicle boxes, plus a label banner when a font is loaded.
pub struct Annotator {
    font: Option<Font<'static>>,
    scale: Scale,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            scale: Scale::uniform(LABEL_SCALE),
        }
    }
}

impl Annotator {
    /// Boxes only; no banner text.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(font: Font<'static>) -> Self {
        Self {
            font: Some(font),
            ..Self::default()
        }
    }

    /// Load a TrueType font for the banner.
    pub fn from_font_file(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let bytes = std::fs::read(path)?;
        let font = Font::try_from_vec(bytes)
            .ok_or_else(|| MediaError::internal(format!("Not a usable font: {}", path.display())))?;

        debug!(path = %path.display(), "Loaded annotation font");
        Ok(Self::with_font(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw red boxes around vehicle detections and a label banner above each.
    ///
    /// Returns the number of boxes drawn.
    pub fn annotate(&self, image: &mut RgbImage, detections: &[Detection]) -> usize {
        if image.width() == 0 || image.height() == 0 {
            return 0;
        }

        let mut drawn = 0;
        for detection in detections.iter().filter(|d| d.is_vehicle()) {
            let bbox = &detection.bbox;
            let x1 = bbox.x1.max(0.0) as i32;
            let y1 = bbox.y1.max(0.0) as i32;
            let x2 = bbox.x2.max(0.0) as i32;
            let y2 = bbox.y2.max(0.0) as i32;
            if x2 <= x1 || y2 <= y1 {
                continue;
            }

            draw_thick_rect(image, x1, y1, (x2 - x1) as u32, (y2 - y1) as u32);
            if let Some(font) = &self.font {
                self.draw_label(image, font, x1, y1);
            }
            drawn += 1;
        }
        drawn
    }

    /// Filled banner with text, anchored above `(x, y)` or just inside when at the top edge.
    fn draw_label(&self, image: &mut RgbImage, font: &Font<'static>, x: i32, y: i32) {
        let (text_width, text_height) = text_size(self.scale, font, ANNOTATION_LABEL);
        let banner_width = text_width + BANNER_PADDING * 2;
        let banner_height = text_height + BANNER_PADDING * 2;
        if banner_width <= 0 || banner_height <= 0 {
            return;
        }

        let top = if y >= banner_height { y - banner_height } else { y };
        draw_filled_rect_mut(
            image,
            Rect::at(x, top).of_size(banner_width as u32, banner_height as u32),
            BOX_COLOR,
        );
        draw_text_mut(
            image,
            TEXT_COLOR,
            x + BANNER_PADDING,
            top + BANNER_PADDING,
            self.scale,
            font,
            ANNOTATION_LABEL,
        );
    }
}

/// `BOX_THICKNESS` nested outlines, growing inward.
fn draw_thick_rect(image: &mut RgbImage, x: i32, y: i32, width: u32, height: u32) {
    for inset in 0..BOX_THICKNESS {
        let (w, h) = (width.saturating_sub(inset * 2), height.saturating_sub(inset * 2));
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at(x + inset as i32, y + inset as i32).of_size(w, h);
        draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }
}
