use anyhow::{bail, Result};
use serde::Deserialize;
use std::str::FromStr;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Model variant selected by configuration.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DetectorProfile {
    /// Smaller, faster model.
    Performance,
    #[default]
    Precision,
}

impl DetectorProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectorProfile::Performance => "performance",
            DetectorProfile::Precision => "precision",
        }
    }
}

impl FromStr for DetectorProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "performance" => Ok(DetectorProfile::Performance),
            "precision" => Ok(DetectorProfile::Precision),
            other => bail!("unknown detector profile '{}'", other),
        }
    }
}

/// Detector backend trait.
///
/// A backend is owned by the detection stage thread for the whole run, so `detect`
/// takes `&mut self` and implementations may keep scratch buffers between calls.
/// Errors are per frame: the stage logs them and treats the frame as having no
/// detections.
pub trait DetectorBackend: Send {
    /// Backend identifier, shown in the model overlay.
    fn name(&self) -> &str;

    /// Run detection on a frame. Boxes are in the frame's pixel coordinates.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
