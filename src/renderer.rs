// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// Frame renderer: letterbox-fits a full-resolution frame plus the
// compositor's overlay onto a fixed output surface. The overlay is scaled to
// exactly the image's display rectangle so mask coordinates line up with the
// displayed pixels.

use ab_glyph::{FontArc, PxScale};
use image::{imageops, DynamicImage, GenericImageView, Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::Detection;

pub struct FrameRenderer {
    width: u32,
    height: u32,
    surface: RgbaImage,
}

impl FrameRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            surface: RgbaImage::new(width, height),
        }
    }

    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    /// Draw one frame: clear to black, letterbox the base image centered,
    /// then alpha-blend the overlay over the same rectangle. Bars appear on
    /// the dimension that over-fits; nothing is cropped.
    pub fn render(&mut self, base: &DynamicImage, overlay: Option<&RgbaImage>) -> &RgbaImage {
        for px in self.surface.pixels_mut() {
            *px = Rgba([0, 0, 0, 255]);
        }

        let (w, h) = base.dimensions();
        if w == 0 || h == 0 {
            return &self.surface;
        }
        let scale = (self.width as f32 / w as f32).min(self.height as f32 / h as f32);
        let draw_w = ((w as f32 * scale).round() as u32).clamp(1, self.width);
        let draw_h = ((h as f32 * scale).round() as u32).clamp(1, self.height);
        let off_x = ((self.width - draw_w) / 2) as i64;
        let off_y = ((self.height - draw_h) / 2) as i64;

        let resized = imageops::resize(
            &base.to_rgba8(),
            draw_w,
            draw_h,
            imageops::FilterType::Triangle,
        );
        imageops::overlay(&mut self.surface, &resized, off_x, off_y);

        if let Some(ov) = overlay {
            let scaled = imageops::resize(ov, draw_w, draw_h, imageops::FilterType::Triangle);
            imageops::overlay(&mut self.surface, &scaled, off_x, off_y);
        }

        &self.surface
    }
}

/// Draw candidate boxes and confidence labels onto a full-resolution copy of
/// the frame, for candidate review. The selected candidate is highlighted;
/// labels are skipped when no font is supplied.
pub fn annotate_candidates(
    base: &DynamicImage,
    candidates: &[Detection],
    selected: Option<usize>,
    font: Option<&FontArc>,
) -> RgbaImage {
    let mut canvas = base.to_rgba8();
    for (i, det) in candidates.iter().enumerate() {
        let color = if Some(i) == selected {
            Rgba([255, 128, 0, 255])
        } else {
            Rgba([0, 255, 0, 255])
        };
        let b = det.bbox();
        let rect = Rect::at(b.xmin() as i32, b.ymin() as i32).of_size(
            (b.width().round() as u32).max(1),
            (b.height().round() as u32).max(1),
        );
        draw_hollow_rect_mut(&mut canvas, rect, color);

        if let Some(font) = font {
            let label = format!("{} {:.0}%", i + 1, det.confidence() * 100.0);
            let ty = if b.ymin() >= 16.0 {
                b.ymin() as i32 - 16
            } else {
                b.ymin() as i32 + 2
            };
            draw_text_mut(
                &mut canvas,
                color,
                b.xmin() as i32,
                ty,
                PxScale::from(14.0),
                font,
                &label,
            );
        }
    }
    canvas
}
