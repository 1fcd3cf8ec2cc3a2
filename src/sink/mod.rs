//! Pipeline sinks: display, output writer and low-confidence archive.
//!
//! The display runs on the controller thread; the writer has its own stage thread
//! and channel. A failing sink stops itself without stopping the run.

mod archive;
pub(crate) mod display;
pub(crate) mod writer;

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::frame::Frame;

pub use archive::{default_archive_dir, JpegArchiver, ARCHIVE_DIR};
pub use display::HeadlessDisplay;
pub use writer::{ImageSequenceWriter, ImageSequenceWriterFactory};

/// Presents annotated frames to an operator.
pub trait DisplaySink {
    fn present(&mut self, frame: &Frame) -> Result<()>;

    /// Polled after every frame; `true` stops the run.
    fn poll_quit_requested(&mut self) -> bool {
        false
    }
}

/// An open output stream.
pub trait FrameWriter: Send {
    fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and finalize the output.
    fn close(&mut self) -> Result<()>;
}

/// Opens output streams. Size and rate are only known once the first frame arrives.
pub trait WriterFactory: Send {
    fn open(&mut self, path: &Path, fps: f64, width: u32, height: u32) -> Result<Box<dyn FrameWriter>>;
}

/// Stores frames whose best detection fell below the confidence threshold.
pub trait LowConfidenceArchiver: Send {
    /// Returns the path written.
    fn save(&mut self, frame: &Frame, sequence: u64, confidence: f32, destination: &Path) -> Result<PathBuf>;
}

/// Writer factory plus the output location for one run.
pub struct WriterTarget {
    pub factory: Box<dyn WriterFactory>,
    pub path: PathBuf,
}

impl WriterTarget {
    pub fn new(factory: impl WriterFactory + 'static, path: impl Into<PathBuf>) -> Self {
        Self {
            factory: Box::new(factory),
            path: path.into(),
        }
    }
}
