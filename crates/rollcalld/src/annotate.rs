//! Draws detections onto frames and encodes them for the MJPEG stream.

use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use rollcall_core::Detection;
use std::path::Path;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;
const CAPTION_SCALE: f32 = 16.0;

pub struct Annotator {
    font: Option<FontVec>,
    jpeg_quality: u8,
}

impl Annotator {
    /// Captions are drawn only when a usable font is supplied.
    pub fn new(font_path: Option<&Path>, jpeg_quality: u8) -> Self {
        let font = font_path.and_then(|path| {
            let loaded = std::fs::read(path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(|e| e.to_string()));
            match loaded {
                Ok(font) => Some(font),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "caption font unusable; drawing boxes only");
                    None
                }
            }
        });
        Self { font, jpeg_quality }
    }

    /// Draw a box (and `label: confidence` caption) per detection.
    pub fn annotate(&self, image: &mut RgbImage, detections: &[Detection]) {
        for det in detections {
            let b = det.bbox;
            for inset in 0..BOX_THICKNESS {
                let w = b.width() - 2 * inset;
                let h = b.height() - 2 * inset;
                if w <= 0 || h <= 0 {
                    break;
                }
                let rect = Rect::at(b.x1 + inset, b.y1 + inset).of_size(w as u32, h as u32);
                draw_hollow_rect_mut(image, rect, BOX_COLOR);
            }

            if let Some(font) = &self.font {
                let caption = format!("{}: {:.2}", det.label, det.confidence);
                let y = (b.y1 - CAPTION_SCALE as i32 - 2).max(0);
                draw_text_mut(image, BOX_COLOR, b.x1, y, PxScale::from(CAPTION_SCALE), font, &caption);
            }
        }
    }

    pub fn encode_jpeg(&self, image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, self.jpeg_quality).encode_image(image)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::BoundingBox;

    fn det(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection {
            label: "alice".into(),
            confidence: 0.91,
            bbox: BoundingBox { x1, y1, x2, y2 },
        }
    }

    #[test]
    fn test_annotate_draws_box_edges() {
        let annotator = Annotator::new(None, 80);
        let mut img = RgbImage::new(20, 20);
        annotator.annotate(&mut img, &[det(2, 2, 12, 12)]);
        assert_eq!(*img.get_pixel(2, 2), BOX_COLOR);
        assert_eq!(*img.get_pixel(3, 3), BOX_COLOR);
        assert_eq!(*img.get_pixel(7, 7), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_annotate_degenerate_box_is_skipped() {
        let annotator = Annotator::new(None, 80);
        let mut img = RgbImage::new(8, 8);
        annotator.annotate(&mut img, &[det(4, 4, 4, 6)]);
        assert!(img.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_missing_font_falls_back() {
        let annotator = Annotator::new(Some(Path::new("/nonexistent/font.ttf")), 80);
        assert!(annotator.font.is_none());
    }

    #[test]
    fn test_encode_jpeg_magic() {
        let annotator = Annotator::new(None, 70);
        let jpeg = annotator.encode_jpeg(&RgbImage::new(16, 16)).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
