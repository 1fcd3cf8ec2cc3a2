//! Frame types that flow through the pipeline.
//!
//! - `Frame`: Decoded RGB image plus sequence number and capture time. Cheap to clone;
//!   the pixel buffer is shared read-only between fan-out consumers.
//! - `FramePacket`: The item carried by every bounded channel (`Frame` or `EndOfStream`).
//! - `SampleRing`: Fixed-capacity ring of recent samples, oldest evicted first.

use image::RgbImage;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;

// ----------------------------------------------------------------------------
// Frame: shared, immutable-once-produced image
// ----------------------------------------------------------------------------

/// A decoded video frame.
///
/// Pixels live behind an `Arc`, so fanning a frame out to several sinks does not copy
/// the buffer. Mutation goes through [`Frame::annotate`], which copies only when the
/// buffer is still shared, so an annotated frame never races a reader.
#[derive(Clone, Debug)]
pub struct Frame {
    image: Arc<RgbImage>,
    /// Monotonic sequence number assigned by the ingest stage (first frame is 1).
    pub sequence: u64,
    /// Wall-clock capture time.
    pub captured_at: SystemTime,
}

impl Frame {
    pub fn new(sequence: u64, image: RgbImage) -> Self {
        Self::with_capture_time(sequence, image, SystemTime::now())
    }

    pub fn with_capture_time(sequence: u64, image: RgbImage, captured_at: SystemTime) -> Self {
        Self {
            image: Arc::new(image),
            sequence,
            captured_at,
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// True when the frame carries no pixels (a source hiccup, not end of stream).
    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    /// Draw on the frame. Copies the pixel buffer first if another holder shares it.
    pub fn annotate<F>(mut self, draw: F) -> Self
    where
        F: FnOnce(&mut RgbImage),
    {
        draw(Arc::make_mut(&mut self.image));
        self
    }
}

/// Item carried by a frame channel.
///
/// `EndOfStream` replaces the repeated "last frame" sentinels: a consumer can tell
/// a marker from real data without comparing pixels.
#[derive(Clone, Debug)]
pub enum FramePacket {
    Frame(Frame),
    EndOfStream,
}

impl FramePacket {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, FramePacket::EndOfStream)
    }
}

// ----------------------------------------------------------------------------
// SampleRing: bounded history
// ----------------------------------------------------------------------------

/// Fixed-capacity ring buffer. Pushing at capacity evicts the oldest sample.
#[derive(Clone, Debug)]
pub struct SampleRing<T> {
    samples: VecDeque<T>,
    capacity: usize,
}

impl<T> SampleRing<T> {
    /// Create a ring holding at most `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: T) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn oldest(&self) -> Option<&T> {
        self.samples.front()
    }

    pub fn newest(&self) -> Option<&T> {
        self.samples.back()
    }

    /// Samples in insertion order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
