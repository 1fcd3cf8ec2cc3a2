use anyhow::{Context, Result};
use image::ImageFormat;
use std::path::{Path, PathBuf};

use super::LowConfidenceArchiver;
use crate::frame::Frame;

/// Archive directory for live sources.
pub const ARCHIVE_DIR: &str = "Saved_Frames";

/// Where low-confidence frames go when no directory is configured: next to the input
/// for recorded media, `Saved_Frames` otherwise.
pub fn default_archive_dir(locator: &str, recorded: bool) -> PathBuf {
    if recorded {
        match Path::new(locator.trim_end_matches(['/', '\\'])).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    } else {
        PathBuf::from(ARCHIVE_DIR)
    }
}

/// Writes `lowscore_<seq>_c-<conf>.jpg` files.
#[derive(Debug, Default)]
pub struct JpegArchiver;

impl JpegArchiver {
    pub fn new() -> Self {
        Self
    }

    pub fn file_name(sequence: u64, confidence: f32) -> String {
        format!("lowscore_{:06}_c-{:.2}.jpg", sequence, confidence)
    }
}

impl LowConfidenceArchiver for JpegArchiver {
    fn save(&mut self, frame: &Frame, sequence: u64, confidence: f32, destination: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(destination)
            .with_context(|| format!("failed to create archive directory {}", destination.display()))?;
        let path = destination.join(Self::file_name(sequence, confidence));
        frame
            .image()
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("failed to save archived frame {}", path.display()))?;
        log::info!("archived low-confidence frame: {}", path.display());
        Ok(path)
    }
}
