use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::channel::DEFAULT_CAPACITY;
use crate::detect::DetectorProfile;
use crate::jump::DEFAULT_RELATIVE_THRESHOLD;

const DEFAULT_MODEL_CONFIDENCE: f32 = 0.8;
const DEFAULT_PERFORMANCE_MODEL: &str = "models/performance.onnx";
const DEFAULT_PRECISION_MODEL: &str = "models/precision.onnx";
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_DETECTION_FLOOR: f32 = 0.35;
const DEFAULT_LABEL: &str = "subject";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ScanConfigFile {
    model_confidence: Option<f32>,
    relative_jump_threshold: Option<f64>,
    show_frame: Option<bool>,
    save_lowscores: Option<bool>,
    channel_capacity: Option<usize>,
    initial_counter: Option<u64>,
    detector: Option<DetectorConfigFile>,
    overlay: Option<OverlayConfigFile>,
    archive: Option<ArchiveConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    profile: Option<DetectorProfile>,
    performance_model: Option<PathBuf>,
    precision_model: Option<PathBuf>,
    input_size: Option<u32>,
    min_confidence: Option<f32>,
    label: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OverlayConfigFile {
    font_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ArchiveConfigFile {
    directory: Option<PathBuf>,
}

/// Validated settings for one scan. Built once and passed by value to the pipeline.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Detections at or below this confidence are not tracked.
    pub model_confidence: f32,
    /// Divisor applied to the box height to get the take-off rise.
    pub relative_jump_threshold: f64,
    /// Present frames on the display; when false the display channel is only drained.
    pub show_frame: bool,
    /// Archive frames whose best detection is below `model_confidence`.
    pub save_lowscores: bool,
    pub channel_capacity: usize,
    pub initial_counter: u64,
    pub detector: DetectorSettings,
    pub overlay: OverlaySettings,
    pub archive: ArchiveSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub profile: DetectorProfile,
    pub performance_model: PathBuf,
    pub precision_model: PathBuf,
    /// Square model input edge in pixels.
    pub input_size: u32,
    /// Raw model scores below this are discarded before selection.
    pub min_confidence: f32,
    pub label: String,
}

impl DetectorSettings {
    /// Model file for the selected profile.
    pub fn model_path(&self) -> &Path {
        match self.profile {
            DetectorProfile::Performance => &self.performance_model,
            DetectorProfile::Precision => &self.precision_model,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OverlaySettings {
    /// TrueType font for overlay text; text is skipped without one.
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveSettings {
    /// Destination for low-confidence frames; derived from the source when unset.
    pub directory: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::from_file(ScanConfigFile::default())
    }
}

impl ScanConfig {
    /// Load from `BOUNCE_CONFIG` (if set), then apply env overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BOUNCE_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (if any), then apply env overrides and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ScanConfigFile) -> Self {
        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            profile: detector_file.profile.unwrap_or_default(),
            performance_model: detector_file
                .performance_model
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PERFORMANCE_MODEL)),
            precision_model: detector_file
                .precision_model
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PRECISION_MODEL)),
            input_size: detector_file.input_size.unwrap_or(DEFAULT_MODEL_INPUT),
            min_confidence: detector_file
                .min_confidence
                .unwrap_or(DEFAULT_DETECTION_FLOOR),
            label: detector_file
                .label
                .unwrap_or_else(|| DEFAULT_LABEL.to_string()),
        };
        Self {
            model_confidence: file.model_confidence.unwrap_or(DEFAULT_MODEL_CONFIDENCE),
            relative_jump_threshold: file
                .relative_jump_threshold
                .unwrap_or(DEFAULT_RELATIVE_THRESHOLD),
            show_frame: file.show_frame.unwrap_or(true),
            save_lowscores: file.save_lowscores.unwrap_or(false),
            channel_capacity: file.channel_capacity.unwrap_or(DEFAULT_CAPACITY),
            initial_counter: file.initial_counter.unwrap_or(0),
            detector,
            overlay: OverlaySettings {
                font_path: file.overlay.and_then(|overlay| overlay.font_path),
            },
            archive: ArchiveSettings {
                directory: file.archive.and_then(|archive| archive.directory),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_value("BOUNCE_MODEL_CONFIDENCE") {
            self.model_confidence = value
                .parse()
                .map_err(|_| anyhow!("BOUNCE_MODEL_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Some(value) = env_value("BOUNCE_JUMP_THRESHOLD") {
            self.relative_jump_threshold = value
                .parse()
                .map_err(|_| anyhow!("BOUNCE_JUMP_THRESHOLD must be a positive number"))?;
        }
        if let Some(value) = env_value("BOUNCE_SHOW_FRAME") {
            self.show_frame = parse_bool("BOUNCE_SHOW_FRAME", &value)?;
        }
        if let Some(value) = env_value("BOUNCE_SAVE_LOWSCORES") {
            self.save_lowscores = parse_bool("BOUNCE_SAVE_LOWSCORES", &value)?;
        }
        if let Some(value) = env_value("BOUNCE_CHANNEL_CAPACITY") {
            self.channel_capacity = value
                .parse()
                .map_err(|_| anyhow!("BOUNCE_CHANNEL_CAPACITY must be a positive integer"))?;
        }
        if let Some(value) = env_value("BOUNCE_DETECTOR_PROFILE") {
            self.detector.profile = value.parse()?;
        }
        Ok(())
    }

    /// Check ranges. Called by `load` and again when a pipeline is built.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.model_confidence) {
            return Err(anyhow!(
                "model_confidence must be within [0, 1], got {}",
                self.model_confidence
            ));
        }
        if !self.relative_jump_threshold.is_finite() || self.relative_jump_threshold <= 0.0 {
            return Err(anyhow!(
                "relative_jump_threshold must be a finite number greater than zero, got {}",
                self.relative_jump_threshold
            ));
        }
        if self.channel_capacity == 0 {
            return Err(anyhow!("channel_capacity must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(anyhow!(
                "detector.min_confidence must be within [0, 1], got {}",
                self.detector.min_confidence
            ));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector.input_size must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ScanConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean (true/false)", key)),
    }
}
