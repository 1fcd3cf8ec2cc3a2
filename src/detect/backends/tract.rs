#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{resize, FilterType};
use tract_onnx::prelude::*;

use crate::config::DetectorSettings;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Tract-based backend for single-output YOLO-style ONNX detectors.
///
/// The model takes a `[1, 3, S, S]` RGB tensor scaled to 0..1 and produces
/// `[1, 4 + classes, anchors]` rows of `(cx, cy, w, h, scores...)` in input pixels.
/// Frames are stretched to `S x S` and boxes are scaled back to frame coordinates.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    min_confidence: f32,
    label: String,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractBackend: loaded {} (input {}x{})",
            model_path.display(),
            input_size,
            input_size
        );

        Ok(Self {
            model,
            input_size,
            min_confidence: 0.25,
            label: "subject".to_string(),
        })
    }

    /// Build from configuration; the profile picks the model file.
    pub fn from_settings(settings: &DetectorSettings) -> Result<Self> {
        Ok(Self::new(settings.model_path(), settings.input_size)?
            .with_threshold(settings.min_confidence)
            .with_label(settings.label.clone()))
    }

    /// Override the raw score floor.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.min_confidence = threshold;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.input_size;
        let resized = resize(frame.image(), side, side, FilterType::Triangle);
        let side = side as usize;
        let pixels = resized.as_raw();
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            let idx = (y * side + x) * 3 + channel;
            pixels[idx] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        // Exported models use either [1, C, N] or the transposed [1, N, C].
        let channels_first = shape[1] < shape[2];
        let (channels, anchors) = if channels_first {
            (shape[1], shape[2])
        } else {
            (shape[2], shape[1])
        };
        if channels < 5 {
            return Err(anyhow!("model output has {} channels, need at least 5", channels));
        }
        let at = |c: usize, n: usize| -> f32 {
            if channels_first {
                view[[0, c, n]]
            } else {
                view[[0, n, c]]
            }
        };

        let scale_x = frame.width() as f32 / self.input_size as f32;
        let scale_y = frame.height() as f32 / self.input_size as f32;
        let max_x = frame.width() as f32;
        let max_y = frame.height() as f32;

        let mut detections = Vec::new();
        for n in 0..anchors {
            let score = (4..channels)
                .map(|c| at(c, n))
                .fold(f32::NEG_INFINITY, f32::max);
            if !score.is_finite() || score < self.min_confidence {
                continue;
            }
            let (cx, cy, w, h) = (at(0, n), at(1, n), at(2, n), at(3, n));
            let x1 = ((cx - w / 2.0) * scale_x).clamp(0.0, max_x);
            let y1 = ((cy - h / 2.0) * scale_y).clamp(0.0, max_y);
            let x2 = ((cx + w / 2.0) * scale_x).clamp(0.0, max_x);
            let y2 = ((cy + h / 2.0) * scale_y).clamp(0.0, max_y);
            let Ok(bbox) = BoundingBox::new(x1, y1, x2, y2) else {
                continue;
            };
            detections.push(
                Detection::new(bbox, score.clamp(0.0, 1.0)).with_label(self.label.clone()),
            );
        }
        Ok(detections)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size as usize;
        let dummy = tract_ndarray::Array4::<f32>::zeros((1, 3, side, side)).into_tensor();
        self.model
            .run(tvec!(dummy.into()))
            .context("ONNX warm-up failed")?;
        Ok(())
    }
}
