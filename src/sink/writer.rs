use anyhow::{Context, Result};
use image::ImageFormat;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use super::{FrameWriter, WriterFactory};
use crate::channel::FrameReceiver;
use crate::frame::{Frame, FramePacket};
use crate::ingest::{SequenceManifest, DEFAULT_FPS};
use crate::report::{bump, RunCounters};

/// How the writer stage ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriterEnd {
    Finished,
    /// End of stream before any frame; nothing was opened.
    NoFrames,
    OpenFailed,
    WriteFailed,
}

impl WriterEnd {
    pub(crate) fn failed(self) -> bool {
        matches!(self, WriterEnd::OpenFailed | WriterEnd::WriteFailed)
    }
}

/// Writer stage body.
///
/// The first frame fixes the output size; the rate comes from the ingest stage's
/// published fps. On failure the receiver is dropped, which tells the detection
/// stage to stop feeding this output.
pub(crate) fn run_writer(
    rx: FrameReceiver,
    mut factory: Box<dyn WriterFactory>,
    path: PathBuf,
    fps: Arc<OnceLock<f64>>,
    counters: Arc<RunCounters>,
) -> WriterEnd {
    let first = match rx.get() {
        FramePacket::Frame(frame) => frame,
        FramePacket::EndOfStream => {
            log::warn!("writer: stream ended before the first frame");
            return WriterEnd::NoFrames;
        }
    };
    let fps = fps.get().copied().unwrap_or(DEFAULT_FPS);

    let mut writer = match factory.open(&path, fps, first.width(), first.height()) {
        Ok(writer) => writer,
        Err(e) => {
            log::error!("writer: unable to open {}: {:#}", path.display(), e);
            return WriterEnd::OpenFailed;
        }
    };
    log::info!(
        "writer: writing {}x{} @ {:.2} fps to {}",
        first.width(),
        first.height(),
        fps,
        path.display()
    );

    let mut end = WriterEnd::Finished;
    let mut next = Some(first);
    while let Some(frame) = next.take() {
        if let Err(e) = writer.write(&frame) {
            log::error!("writer: failed on frame {}: {:#}", frame.sequence, e);
            end = WriterEnd::WriteFailed;
            break;
        }
        bump(&counters.written);
        if let FramePacket::Frame(frame) = rx.get() {
            next = Some(frame);
        }
    }
    drop(rx);

    if let Err(e) = writer.close() {
        log::error!("writer: failed to finalize {}: {:#}", path.display(), e);
        end = WriterEnd::WriteFailed;
    } else if end == WriterEnd::Finished {
        log::info!("writer: saved {}", path.display());
    }
    end
}

/// Writes each frame as `frame_NNNNNN.png` into a directory, plus a
/// `manifest.json` with rate and size on close. The directory can be replayed
/// with the image-sequence source.
pub struct ImageSequenceWriter {
    dir: PathBuf,
    manifest: SequenceManifest,
}

impl ImageSequenceWriter {
    pub fn create(dir: &Path, fps: f64, width: u32, height: u32) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            manifest: SequenceManifest {
                fps,
                width,
                height,
                frames: 0,
            },
        })
    }
}

impl FrameWriter for ImageSequenceWriter {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        let path = self
            .dir
            .join(format!("frame_{:06}.png", self.manifest.frames + 1));
        frame
            .image()
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.manifest.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.manifest.write(&self.dir)
    }
}

#[derive(Debug, Default)]
pub struct ImageSequenceWriterFactory;

impl WriterFactory for ImageSequenceWriterFactory {
    fn open(&mut self, path: &Path, fps: f64, width: u32, height: u32) -> Result<Box<dyn FrameWriter>> {
        Ok(Box::new(ImageSequenceWriter::create(path, fps, width, height)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::frame_channel;
    use crate::shutdown::ShutdownSignal;
    use image::RgbImage;

    #[test]
    fn writes_frames_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("clip_out");
        let (tx, rx) = frame_channel(8, ShutdownSignal::new());
        for seq in 1..=3 {
            tx.put(Frame::new(seq, RgbImage::new(6, 4)));
        }
        tx.end_of_stream(2);

        let fps = Arc::new(OnceLock::new());
        fps.set(12.5).unwrap();
        let counters = Arc::new(RunCounters::default());
        let end = run_writer(
            rx,
            Box::new(ImageSequenceWriterFactory),
            out.clone(),
            fps,
            counters.clone(),
        );

        assert_eq!(end, WriterEnd::Finished);
        assert_eq!(crate::report::read(&counters.written), 3);
        assert!(out.join("frame_000003.png").exists());
        let manifest = SequenceManifest::read(&out).unwrap().unwrap();
        assert_eq!(
            manifest,
            SequenceManifest {
                fps: 12.5,
                width: 6,
                height: 4,
                frames: 3
            }
        );
    }

    #[test]
    fn empty_stream_opens_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("never");
        let (tx, rx) = frame_channel(2, ShutdownSignal::new());
        tx.end_of_stream(1);
        let end = run_writer(
            rx,
            Box::new(ImageSequenceWriterFactory),
            out.clone(),
            Arc::new(OnceLock::new()),
            Arc::new(RunCounters::default()),
        );
        assert_eq!(end, WriterEnd::NoFrames);
        assert!(!out.exists());
    }
}
