#![allow(dead_code)]

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bounce_counter::{DisplaySink, Frame, FrameSource, FrameWriter, WriterFactory};

/// Source of blank frames with a configurable length and failure point.
pub struct ScriptedSource {
    frames: Option<u64>,
    fail_after: Option<u64>,
    fps: f64,
    recorded: bool,
    produced: u64,
    pub closed: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(frames: u64) -> Self {
        Self {
            frames: Some(frames),
            fail_after: None,
            fps: 1000.0,
            recorded: false,
            produced: 0,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            frames: None,
            ..Self::new(0)
        }
    }

    /// Read error once `frames` frames have been produced.
    pub fn failing_after(frames: u64) -> Self {
        Self {
            frames: None,
            fail_after: Some(frames),
            ..Self::new(0)
        }
    }

    pub fn recorded(mut self) -> Self {
        self.recorded = true;
        self
    }
}

impl FrameSource for ScriptedSource {
    fn locator(&self) -> &str {
        "scripted://clip"
    }

    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.fail_after == Some(self.produced) {
            return Err(anyhow!("decoder error after {} frames", self.produced));
        }
        if self.frames.is_some_and(|total| self.produced >= total) {
            return Ok(None);
        }
        self.produced += 1;
        Ok(Some(RgbImage::new(320, 240)))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_recorded(&self) -> bool {
        self.recorded
    }
}

/// Display that records the sequence of every presented frame.
#[derive(Default)]
pub struct RecordingDisplay {
    pub seen: Arc<Mutex<Vec<u64>>>,
    quit_after: Option<usize>,
}

impl RecordingDisplay {
    pub fn quitting_after(frames: usize) -> Self {
        Self {
            quit_after: Some(frames),
            ..Self::default()
        }
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.seen.lock().unwrap().clone()
    }
}

impl DisplaySink for RecordingDisplay {
    fn present(&mut self, frame: &Frame) -> Result<()> {
        self.seen.lock().unwrap().push(frame.sequence);
        Ok(())
    }

    fn poll_quit_requested(&mut self) -> bool {
        self.quit_after
            .is_some_and(|n| self.seen.lock().unwrap().len() >= n)
    }
}

/// What a [`RecordingWriterFactory`] observed.
#[derive(Debug, Default)]
pub struct WriterLog {
    pub opened: Option<(PathBuf, f64, u32, u32)>,
    pub written: Vec<u64>,
    pub closed: bool,
}

#[derive(Clone, Default)]
pub struct RecordingWriterFactory {
    pub log: Arc<Mutex<WriterLog>>,
}

struct RecordingWriter {
    log: Arc<Mutex<WriterLog>>,
}

impl WriterFactory for RecordingWriterFactory {
    fn open(&mut self, path: &Path, fps: f64, width: u32, height: u32) -> Result<Box<dyn FrameWriter>> {
        self.log.lock().unwrap().opened = Some((path.to_path_buf(), fps, width, height));
        Ok(Box::new(RecordingWriter {
            log: self.log.clone(),
        }))
    }
}

impl FrameWriter for RecordingWriter {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        self.log.lock().unwrap().written.push(frame.sequence);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Factory whose `open` always fails.
pub struct FailingWriterFactory;

impl WriterFactory for FailingWriterFactory {
    fn open(&mut self, path: &Path, _fps: f64, _width: u32, _height: u32) -> Result<Box<dyn FrameWriter>> {
        Err(anyhow!("cannot create {}", path.display()))
    }
}
