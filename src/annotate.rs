//! Frame overlays drawn by the detection stage.
//!
//! Geometry is proportional to the frame size so overlays land in the same place
//! regardless of resolution. Text needs a TrueType font; when none is configured the
//! shapes are still drawn and text is skipped.

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut,
};
use imageproc::rect::Rect;
use std::path::Path;
use std::time::Duration;

use crate::detect::Detection;
use crate::frame::SampleRing;

/// Positions kept for the motion trail.
pub const TRAIL_LENGTH: usize = 10;

/// Processed frames averaged by the fps overlay.
pub const FPS_WINDOW: usize = 150;

/// Horizontal offset of the trail relative to the subject centre.
const TRAIL_X_OFFSET: f64 = 100.0;
const BOX_THICKNESS: i32 = 4;

const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);

pub struct Overlay {
    font: Option<FontVec>,
    model_label: String,
}

impl std::fmt::Debug for Overlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overlay")
            .field("has_font", &self.font.is_some())
            .field("model_label", &self.model_label)
            .finish()
    }
}

impl Overlay {
    /// Overlay without text rendering.
    pub fn new(model_label: impl Into<String>) -> Self {
        Self {
            font: None,
            model_label: model_label.into(),
        }
    }

    /// Overlay rendering text with the TrueType/OpenType font at `path`.
    pub fn with_font_file(model_label: impl Into<String>, path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read overlay font {}", path.display()))?;
        let font = FontVec::try_from_vec(data)
            .map_err(|e| anyhow!("invalid overlay font {}: {}", path.display(), e))?;
        Ok(Self {
            font: Some(font),
            model_label: model_label.into(),
        })
    }

    pub fn renders_text(&self) -> bool {
        self.font.is_some()
    }

    pub fn model_label(&self) -> &str {
        &self.model_label
    }

    /// Black panel with `Counter: NN` in the upper middle of the frame.
    pub fn draw_counter(&self, image: &mut RgbImage, count: u64) {
        let (w, h) = (image.width() as f64, image.height() as f64);
        let x1 = (0.5 * w) as i32;
        let y1 = (0.064 * h) as i32;
        let x2 = (0.628 * w) as i32;
        let y2 = (0.098 * h) as i32;
        if let Some(panel) = rect_between(x1, y1, x2, y2) {
            draw_filled_rect_mut(image, panel, BLACK);
        }
        let text = format!("Counter: {:02}", count);
        self.text_at_baseline(image, &text, x1, (0.1 * h) as i32, text_scale(h, 1.0), YELLOW);
    }

    pub fn draw_fps(&self, image: &mut RgbImage, fps: u32) {
        let (w, h) = (image.width() as f64, image.height() as f64);
        let text = format!("FPS: {}", fps);
        self.text_at_baseline(
            image,
            &text,
            (0.02 * w) as i32,
            (0.1 * h) as i32,
            text_scale(h, 1.0),
            GREEN,
        );
    }

    pub fn draw_model_label(&self, image: &mut RgbImage) {
        let (w, h) = (image.width() as f64, image.height() as f64);
        let text = format!("Model: {}", self.model_label);
        self.text_at_baseline(
            image,
            &text,
            (0.02 * w) as i32,
            (0.98 * h) as i32,
            text_scale(h, 0.5),
            GREEN,
        );
    }

    /// Green box around an accepted detection with a `label[conf]` caption.
    pub fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
        let b = &detection.bbox;
        let (x1, y1, x2, y2) = (b.x1 as i32, b.y1 as i32, b.x2 as i32, b.y2 as i32);
        for inset in 0..BOX_THICKNESS {
            if let Some(r) = rect_between(x1 + inset, y1 + inset, x2 - inset, y2 - inset) {
                draw_hollow_rect_mut(image, r, GREEN);
            }
        }
        let caption = format!(
            "{}[{:.1}]",
            detection.label.as_deref().unwrap_or("subject"),
            detection.confidence
        );
        let h = image.height() as f64;
        self.text_at_baseline(image, &caption, x1, y1 - 10, text_scale(h, 1.3), GREEN);
    }

    /// Red dots for recent centres; later points are drawn larger.
    pub fn draw_trail(&self, image: &mut RgbImage, trail: &Trail) {
        let len = trail.points.len();
        for (i, &(x, y)) in trail.points.iter().enumerate().skip(1) {
            let thickness = (10.0 * i as f64 / len as f64) as i32;
            if thickness == 0 {
                continue;
            }
            let centre = ((x + TRAIL_X_OFFSET) as i32, y as i32);
            draw_filled_circle_mut(image, centre, thickness / 2 + 1, RED);
        }
    }

    fn text_at_baseline(
        &self,
        image: &mut RgbImage,
        text: &str,
        x: i32,
        baseline: i32,
        scale: PxScale,
        color: Rgb<u8>,
    ) {
        if let Some(font) = &self.font {
            let top = baseline - scale.y as i32;
            draw_text_mut(image, color, x, top.max(0), scale, font, text);
        }
    }
}

fn rect_between(x1: i32, y1: i32, x2: i32, y2: i32) -> Option<Rect> {
    let (w, h) = (x2 - x1, y2 - y1);
    if w <= 0 || h <= 0 {
        return None;
    }
    Some(Rect::at(x1, y1).of_size(w as u32, h as u32))
}

/// Pixel height for a glyph scale relative to a 720-line frame.
fn text_scale(frame_height: f64, factor: f64) -> PxScale {
    let px = (frame_height / 720.0 * 32.0 * factor).max(8.0);
    PxScale::from(px as f32)
}

/// Recent subject centres for the cosmetic motion trail.
#[derive(Clone, Debug)]
pub struct Trail {
    points: SampleRing<(f64, f64)>,
}

impl Trail {
    pub fn new() -> Self {
        Self {
            points: SampleRing::new(TRAIL_LENGTH),
        }
    }

    pub fn push(&mut self, centre: (f64, f64)) {
        self.points.push(centre);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl Default for Trail {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolling average of per-frame processing rate.
#[derive(Clone, Debug)]
pub struct FpsMeter {
    samples: SampleRing<f64>,
}

impl FpsMeter {
    pub fn new(window: usize) -> Self {
        Self {
            samples: SampleRing::new(window),
        }
    }

    /// Record one frame's processing time and return the rounded window average.
    pub fn record(&mut self, elapsed: Duration) -> u32 {
        let secs = elapsed.as_secs_f64();
        let fps = if secs > 0.0 { 1.0 / secs } else { 0.0 };
        self.samples.push(fps);
        self.average().round() as u32
    }

    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new(FPS_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[test]
    fn counter_panel_is_painted_without_font() {
        let mut img = RgbImage::from_pixel(1000, 1000, Rgb([255, 255, 255]));
        Overlay::new("blob").draw_counter(&mut img, 3);
        assert_eq!(img.get_pixel(550, 80), &BLACK);
        assert_eq!(img.get_pixel(400, 80), &Rgb([255, 255, 255]));
    }

    #[test]
    fn detection_box_is_four_pixels_thick() {
        let mut img = RgbImage::new(200, 200);
        let det = Detection::new(BoundingBox::new(20.0, 20.0, 120.0, 150.0).unwrap(), 0.9);
        Overlay::new("blob").draw_detection(&mut img, &det);
        for inset in 0..4 {
            assert_eq!(img.get_pixel(20 + inset, 80), &GREEN);
        }
        assert_eq!(img.get_pixel(25, 80), &BLACK);
    }

    #[test]
    fn trail_is_bounded_and_offset() {
        let mut trail = Trail::new();
        for i in 0..15 {
            trail.push((50.0, 10.0 * i as f64 + 20.0));
        }
        assert_eq!(trail.len(), TRAIL_LENGTH);

        let mut img = RgbImage::new(300, 300);
        Overlay::new("blob").draw_trail(&mut img, &trail);
        // Newest point (y = 160) is drawn at x + 100.
        assert_eq!(img.get_pixel(150, 160), &RED);
        assert_eq!(img.get_pixel(50, 160), &BLACK);
    }

    #[test]
    fn fps_meter_averages_window() {
        let mut meter = FpsMeter::new(2);
        assert_eq!(meter.record(Duration::from_millis(100)), 10);
        assert_eq!(meter.record(Duration::from_millis(50)), 15);
        // Oldest sample (10 fps) is evicted.
        assert_eq!(meter.record(Duration::from_millis(50)), 20);
        assert_eq!(meter.record(Duration::ZERO), 10);
    }

    #[test]
    fn degenerate_rects_are_skipped() {
        assert!(rect_between(5, 5, 5, 10).is_none());
        assert!(rect_between(5, 5, 4, 10).is_none());
        assert!(rect_between(0, 0, 1, 1).is_some());
    }
}
