use anyhow::Result;
use image::RgbImage;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use super::{effective_fps, FrameSource, SourceUnavailable};
use crate::channel::{FrameSender, SendOutcome, POLL_INTERVAL};
use crate::frame::Frame;
use crate::report::{bump, RunCounters};
use crate::shutdown::ShutdownSignal;

/// End-of-stream markers pushed when ingest stops.
const SENTINELS: usize = 2;

/// Ingest runs this much faster than the nominal rate.
const PACING_FACTOR: f64 = 1.2;

/// Longest wait between two frames, whatever rate the source reports.
pub(crate) const MAX_PACE: Duration = Duration::from_secs(1);

/// How the ingest stage ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum IngestEnd {
    Exhausted,
    /// A read failed mid-run; treated like exhaustion.
    ReadFailed(String),
    Stopped,
    /// The detection stage went away.
    Disconnected,
}

/// Closes the source when dropped, whichever way the stage exits.
pub(crate) struct SourceGuard {
    source: Box<dyn FrameSource>,
}

impl SourceGuard {
    pub(crate) fn new(source: Box<dyn FrameSource>) -> Self {
        Self { source }
    }
}

impl Deref for SourceGuard {
    type Target = dyn FrameSource;

    fn deref(&self) -> &Self::Target {
        self.source.as_ref()
    }
}

impl DerefMut for SourceGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.source.as_mut()
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.source.close();
        log::info!("ingest: released {}", self.source.locator());
    }
}

/// A source whose first frame has been read successfully.
pub(crate) struct PrimedSource {
    pub source: SourceGuard,
    pub first: RgbImage,
    pub fps: f64,
    pub skipped: u64,
}

/// Read the first non-empty frame on the caller's thread.
///
/// Any error or an exhausted source means the run cannot start.
pub(crate) fn prime(source: Box<dyn FrameSource>) -> Result<PrimedSource> {
    let mut source = SourceGuard::new(source);
    let locator = source.locator().to_string();
    let mut skipped = 0;
    let first = loop {
        match source.read_frame() {
            Ok(Some(image)) if is_empty(&image) => {
                skipped += 1;
                log::warn!("ingest: skipping empty frame while priming {}", locator);
            }
            Ok(Some(image)) => break image,
            Ok(None) => {
                return Err(SourceUnavailable {
                    locator,
                    reason: "no frames".to_string(),
                }
                .into())
            }
            Err(e) => {
                return Err(SourceUnavailable {
                    locator,
                    reason: format!("{:#}", e),
                }
                .into())
            }
        }
    };
    let reported = source.frame_rate();
    let fps = effective_fps(reported);
    if fps != reported {
        log::warn!("ingest: invalid source fps {}, defaulting to {}", reported, fps);
    }
    log::info!("ingest: {} {}x{} @ {:.2} fps", locator, first.width(), first.height(), fps);
    Ok(PrimedSource {
        source,
        first,
        fps,
        skipped,
    })
}

fn is_empty(image: &RgbImage) -> bool {
    image.width() == 0 || image.height() == 0
}

/// Delay between frames: `1 / (fps * 1.2)`, capped at [`MAX_PACE`].
pub(crate) fn pacing_interval(fps: f64) -> Duration {
    Duration::try_from_secs_f64(1.0 / (fps * PACING_FACTOR))
        .map(|pace| pace.min(MAX_PACE))
        .unwrap_or(MAX_PACE)
}

/// Sleep for `pace` in poll-sized slices. Returns false if shutdown cut it short.
fn wait_paced(pace: Duration, shutdown: &ShutdownSignal) -> bool {
    let deadline = Instant::now() + pace;
    loop {
        if shutdown.is_triggered() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(POLL_INTERVAL));
    }
}

/// Ingest stage body.
///
/// Publishes the fps before the first frame is queued, then reads and queues frames
/// paced by [`pacing_interval`]. Ending for any reason queues end-of-stream markers;
/// the global shutdown signal is left to the controller.
pub(crate) fn run_ingest(
    primed: PrimedSource,
    tx: FrameSender,
    fps_cell: Arc<OnceLock<f64>>,
    shutdown: ShutdownSignal,
    counters: Arc<RunCounters>,
) -> IngestEnd {
    let PrimedSource {
        mut source,
        first,
        fps,
        skipped,
    } = primed;
    for _ in 0..skipped {
        bump(&counters.empty_frames);
    }
    let _ = fps_cell.set(fps);
    let pace = pacing_interval(fps);

    let mut sequence = 1;
    let mut end = match tx.put(Frame::new(sequence, first)) {
        SendOutcome::Delivered => {
            bump(&counters.ingested);
            None
        }
        SendOutcome::Shutdown => Some(IngestEnd::Stopped),
        SendOutcome::Disconnected => Some(IngestEnd::Disconnected),
    };

    while end.is_none() {
        if shutdown.is_triggered() {
            end = Some(IngestEnd::Stopped);
            break;
        }
        match source.read_frame() {
            Ok(Some(image)) if is_empty(&image) => {
                bump(&counters.empty_frames);
                log::warn!("ingest: received empty frame, skipping");
            }
            Ok(Some(image)) => {
                sequence += 1;
                match tx.put(Frame::new(sequence, image)) {
                    SendOutcome::Delivered => bump(&counters.ingested),
                    SendOutcome::Shutdown => end = Some(IngestEnd::Stopped),
                    SendOutcome::Disconnected => end = Some(IngestEnd::Disconnected),
                }
                if end.is_none() && !wait_paced(pace, &shutdown) {
                    end = Some(IngestEnd::Stopped);
                }
            }
            Ok(None) => {
                log::info!("ingest: source exhausted after {} frames", sequence);
                end = Some(IngestEnd::Exhausted);
            }
            Err(e) => {
                log::warn!("ingest: read failed after {} frames, ending stream: {:#}", sequence, e);
                end = Some(IngestEnd::ReadFailed(format!("{:#}", e)));
            }
        }
    }

    tx.end_of_stream(SENTINELS);
    end.unwrap_or(IngestEnd::Stopped)
}
