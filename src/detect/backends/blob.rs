use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Luma at or above this counts as part of the subject.
const DEFAULT_LUMA_THRESHOLD: u8 = 200;
/// Fewer bright pixels than this is treated as noise.
const DEFAULT_MIN_PIXELS: usize = 16;

/// CPU backend that finds a single bright subject on a darker background.
///
/// The box is the extent of all pixels at or above the luma threshold and the
/// confidence is how much of that box they fill, so a solid subject scores 1.0
/// and scattered highlights score low.
#[derive(Clone, Debug)]
pub struct BlobBackend {
    luma_threshold: u8,
    min_pixels: usize,
    label: String,
}

impl BlobBackend {
    pub fn new() -> Self {
        Self {
            luma_threshold: DEFAULT_LUMA_THRESHOLD,
            min_pixels: DEFAULT_MIN_PIXELS,
            label: "subject".to_string(),
        }
    }

    pub fn with_threshold(mut self, luma_threshold: u8) -> Self {
        self.luma_threshold = luma_threshold;
        self
    }

    pub fn with_min_pixels(mut self, min_pixels: usize) -> Self {
        self.min_pixels = min_pixels.max(1);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

impl Default for BlobBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for BlobBackend {
    fn name(&self) -> &str {
        "blob"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let image = frame.image();
        let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
        let (mut max_x, mut max_y) = (0u32, 0u32);
        let mut count = 0usize;

        for (x, y, px) in image.enumerate_pixels() {
            let [r, g, b] = px.0;
            let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000;
            if luma >= self.luma_threshold as u32 {
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                count += 1;
            }
        }

        if count < self.min_pixels {
            return Ok(Vec::new());
        }

        let bbox = BoundingBox::new(
            min_x as f32,
            min_y as f32,
            (max_x + 1) as f32,
            (max_y + 1) as f32,
        )?;
        let area = (bbox.width() * bbox.height()).max(1.0);
        let confidence = (count as f32 / area).clamp(0.0, 1.0);

        Ok(vec![Detection::new(bbox, confidence).with_label(self.label.clone())])
    }
}
