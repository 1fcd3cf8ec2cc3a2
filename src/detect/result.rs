use anyhow::{bail, Result};

/// Axis-aligned bounding box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Build a box, rejecting non-finite or inverted corners.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self> {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            bail!("bounding box has non-finite corner ({x1}, {y1}, {x2}, {y2})");
        }
        if x1 >= x2 || y1 >= y2 {
            bail!("bounding box corners are inverted ({x1}, {y1}, {x2}, {y2})");
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// One detector hit.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    /// Optional class label used for the box caption.
    pub label: Option<String>,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            bbox,
            confidence,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Highest-confidence detection. On ties the earliest one wins; NaN scores are
/// ignored.
pub fn select_best(detections: &[Detection]) -> Option<&Detection> {
    let mut best: Option<&Detection> = None;
    for detection in detections {
        if detection.confidence.is_nan() {
            continue;
        }
        match best {
            Some(current) if detection.confidence <= current.confidence => {}
            _ => best = Some(detection),
        }
    }
    best
}
