use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::FrameSource;

/// File name of the sidecar describing an image sequence.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Sidecar written next to an image sequence.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SequenceManifest {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub frames: u64,
}

impl SequenceManifest {
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let manifest = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid manifest {}: {}", path.display(), e))?;
        Ok(Some(manifest))
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, raw).with_context(|| format!("failed to write {}", path.display()))
    }
}

/// Directory of still images replayed as a recorded stream, in file-name order.
#[derive(Debug)]
pub struct ImageSequenceSource {
    locator: String,
    files: Vec<PathBuf>,
    next: usize,
    fps: f64,
}

impl ImageSequenceSource {
    pub fn open(dir: &str) -> Result<Self> {
        let path = Path::new(dir);
        let mut files = Vec::new();
        for entry in std::fs::read_dir(path)
            .with_context(|| format!("failed to list image directory {}", path.display()))?
        {
            let entry = entry?;
            let file = entry.path();
            if file.is_file() && is_frame_image(&file) {
                files.push(file);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(anyhow!("no .png/.jpg frames in {}", path.display()));
        }
        let fps = SequenceManifest::read(path)?.map(|m| m.fps).unwrap_or(0.0);
        log::info!(
            "ImageSequenceSource: connected to {} ({} frames)",
            path.display(),
            files.len()
        );
        Ok(Self {
            locator: dir.to_string(),
            files,
            next: 0,
            fps,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_frame_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn locator(&self) -> &str {
        &self.locator
    }

    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let image = image::open(path)
            .with_context(|| format!("failed to decode frame {}", path.display()))?;
        Ok(Some(image.to_rgb8()))
    }

    fn is_recorded(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_frames_in_name_order_with_manifest_fps() {
        let dir = tempfile::tempdir().unwrap();
        for (name, shade) in [("b.png", 20u8), ("a.png", 10), ("c.jpg", 30)] {
            RgbImage::from_pixel(8, 6, image::Rgb([shade, shade, shade]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        SequenceManifest {
            fps: 24.0,
            width: 8,
            height: 6,
            frames: 3,
        }
        .write(dir.path())
        .unwrap();

        let mut source = ImageSequenceSource::open(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(source.len(), 3);
        assert_eq!(source.frame_rate(), 24.0);
        assert!(source.is_recorded());

        let first = source.read_frame().unwrap().unwrap();
        assert_eq!(first.get_pixel(0, 0).0, [10, 10, 10]);
        let second = source.read_frame().unwrap().unwrap();
        assert_eq!(second.get_pixel(0, 0).0, [20, 20, 20]);
        assert!(source.read_frame().unwrap().is_some());
        assert!(source.read_frame().unwrap().is_none());
    }

    #[test]
    fn empty_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageSequenceSource::open(dir.path().to_str().unwrap()).is_err());
    }
}
