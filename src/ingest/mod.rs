//! Frame sources and the ingest stage.
//!
//! Sources are selected by locator:
//! - `stub://<name>?frames=N&fps=F`: synthetic bouncing subject (tests, demos)
//! - a directory: image sequence (`*.png`, `*.jpg`) read in file-name order
//! - any other local path: video file (feature: ingest-file-ffmpeg)
//!
//! Network locators are rejected; stream negotiation happens outside this crate and
//! hands over a local source.

#[cfg(feature = "ingest-file-ffmpeg")]
mod file_ffmpeg;
mod sequence;
pub(crate) mod stage;
mod synthetic;

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::fmt;
use std::path::{Path, PathBuf};

#[cfg(feature = "ingest-file-ffmpeg")]
pub use file_ffmpeg::FfmpegFileSource;
pub use sequence::{ImageSequenceSource, SequenceManifest};
pub use synthetic::SyntheticSource;

/// Frame rate assumed when a source reports none (or a non-positive one).
pub const DEFAULT_FPS: f64 = 30.0;

/// A producer of decoded frames.
///
/// `read_frame` returns `Ok(None)` once the source is exhausted. An image with zero
/// width or height is a transient hiccup, not the end of the stream.
pub trait FrameSource: Send {
    /// Locator the source was opened from.
    fn locator(&self) -> &str;

    /// Nominal frame rate; `0.0` or less when unknown.
    fn frame_rate(&self) -> f64;

    fn read_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Release the underlying handle. Called exactly once by the ingest stage.
    fn close(&mut self) {}

    /// True for recorded media (files, image sequences) as opposed to live feeds.
    /// Recorded sources get an output writer.
    fn is_recorded(&self) -> bool {
        false
    }
}

/// Nominal fps, or [`DEFAULT_FPS`] when the source reports an unusable value.
pub fn effective_fps(reported: f64) -> f64 {
    if reported.is_finite() && reported > 0.0 {
        reported
    } else {
        DEFAULT_FPS
    }
}

/// Open a source for `locator`.
pub fn open_source(locator: &str) -> Result<Box<dyn FrameSource>> {
    if !is_local_locator(locator) {
        return Err(anyhow!(
            "unsupported locator '{}': only local paths and stub:// are accepted",
            locator
        ));
    }
    if locator.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::parse(locator)?));
    }
    if Path::new(locator).is_dir() {
        return Ok(Box::new(ImageSequenceSource::open(locator)?));
    }
    #[cfg(feature = "ingest-file-ffmpeg")]
    {
        Ok(Box::new(FfmpegFileSource::open(locator)?))
    }
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    {
        Err(anyhow!(
            "video file input '{}' requires the ingest-file-ffmpeg feature",
            locator
        ))
    }
}

/// Output location for a recorded source: the locator with `_out` appended.
pub fn output_path_for(locator: &str) -> PathBuf {
    PathBuf::from(format!("{}_out", locator.trim_end_matches(['/', '\\'])))
}

fn is_local_locator(locator: &str) -> bool {
    if locator.trim().is_empty() {
        return false;
    }
    if locator.starts_with("stub://") {
        return true;
    }
    !locator.contains("://")
}

/// The source could not be opened or produced no first frame. The run is aborted
/// before any stage starts.
#[derive(Debug)]
pub struct SourceUnavailable {
    pub locator: String,
    pub reason: String,
}

impl fmt::Display for SourceUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source '{}' unavailable: {}", self.locator, self.reason)
    }
}

impl std::error::Error for SourceUnavailable {}
