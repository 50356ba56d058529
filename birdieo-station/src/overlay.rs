//! Detection overlay drawn on top of the live stream.

use ab_glyph::{FontArc, PxScale};
use birdieo_shared::{BoundingBox, DetectionResult};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
const LABEL_TEXT: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Per-category colors and stroke sizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub person: Rgba<u8>,
    pub flagstick: Rgba<u8>,
    pub golf_ball: Rgba<u8>,
    pub line_width: u32,
    pub label_height: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            person: Rgba([0, 200, 255, 255]),
            flagstick: Rgba([255, 64, 64, 255]),
            golf_ball: Rgba([255, 230, 0, 255]),
            line_width: 3,
            label_height: 16,
        }
    }
}

/// Stateless renderer; output depends only on its inputs.
pub struct DetectionOverlayRenderer {
    style: OverlayStyle,
    font: Option<FontArc>,
}

impl Default for DetectionOverlayRenderer {
    fn default() -> Self {
        Self::new(OverlayStyle::default())
    }
}

impl DetectionOverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style, font: None }
    }

    /// Draw label text with `font`. Without a font only the label tabs are drawn.
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Clear `surface` and draw every detection in `detections`.
    ///
    /// Boxes are in source-frame pixels; `source_size` is that frame's size.
    /// When it is unknown the surface is assumed to match the source.
    pub fn render(
        &self,
        surface: &mut RgbaImage,
        detections: &DetectionResult,
        source_size: Option<(u32, u32)>,
    ) {
        for pixel in surface.pixels_mut() {
            *pixel = TRANSPARENT;
        }

        let (sx, sy) = match source_size {
            Some((w, h)) if w > 0 && h > 0 => (
                surface.width() as f64 / w as f64,
                surface.height() as f64 / h as f64,
            ),
            _ => (1.0, 1.0),
        };

        for person in &detections.people {
            let label = match person.id.as_deref() {
                Some(id) => format!("{id} {:.0}%", person.confidence * 100.0),
                None => format!("Person {:.0}%", person.confidence * 100.0),
            };
            self.draw_detection(surface, &person.bbox.scaled(sx, sy), self.style.person, &label);
        }
        for flag in &detections.flagstick {
            let label = format!("Flagstick {:.0}%", flag.confidence * 100.0);
            self.draw_detection(surface, &flag.bbox.scaled(sx, sy), self.style.flagstick, &label);
        }
        for ball in &detections.golf_balls {
            let label = format!("Ball {:.0}%", ball.confidence * 100.0);
            self.draw_detection(surface, &ball.bbox.scaled(sx, sy), self.style.golf_ball, &label);
        }
    }

    fn draw_detection(&self, surface: &mut RgbaImage, bbox: &BoundingBox, color: Rgba<u8>, label: &str) {
        let Some((x, y, width, height)) = clip_to_surface(bbox, surface.width(), surface.height()) else {
            return;
        };

        // Thick outline as nested one-pixel rectangles
        for inset in 0..self.style.line_width {
            let w = width.saturating_sub(2 * inset);
            let h = height.saturating_sub(2 * inset);
            if w == 0 || h == 0 {
                break;
            }
            let offset = inset as i32;
            draw_hollow_rect_mut(surface, Rect::at(x + offset, y + offset).of_size(w, h), color);
        }

        let label_h = self.style.label_height;
        if label_h == 0 {
            return;
        }
        // Roughly 0.6em per glyph
        let label_w = ((label.chars().count() as f32 * label_h as f32 * 0.6).ceil() as u32).max(1) + 4;
        // Tab sits above the box, or inside it when there is no room above
        let label_y = if y >= label_h as i32 { y - label_h as i32 } else { y };
        draw_filled_rect_mut(surface, Rect::at(x, label_y).of_size(label_w, label_h), color);

        if let Some(font) = &self.font {
            let scale = PxScale::from(label_h as f32 * 0.9);
            draw_text_mut(surface, LABEL_TEXT, x + 2, label_y, scale, font, label);
        }
    }
}

/// Clamp `bbox` to the surface as `(x, y, width, height)` in whole pixels.
///
/// `None` for boxes that miss the surface entirely or carry non-finite values.
fn clip_to_surface(bbox: &BoundingBox, surface_w: u32, surface_h: u32) -> Option<(i32, i32, u32, u32)> {
    if surface_w == 0 || surface_h == 0 {
        return None;
    }
    if ![bbox.x, bbox.y, bbox.width, bbox.height].iter().all(|v| v.is_finite()) {
        return None;
    }

    let (sw, sh) = (surface_w as f64, surface_h as f64);
    let right = bbox.x + bbox.width.max(0.0);
    let bottom = bbox.y + bbox.height.max(0.0);
    if bbox.x >= sw || bbox.y >= sh || right < 0.0 || bottom < 0.0 {
        return None;
    }

    let x0 = bbox.x.round().clamp(0.0, sw - 1.0);
    let y0 = bbox.y.round().clamp(0.0, sh - 1.0);
    let x1 = right.round().clamp(x0 + 1.0, sw);
    let y1 = bottom.round().clamp(y0 + 1.0, sh);
    Some((x0 as i32, y0 as i32, (x1 - x0) as u32, (y1 - y0) as u32))
}
