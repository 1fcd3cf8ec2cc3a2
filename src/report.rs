//! Run outcome types: the per-run report and the completion notification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Why a scan stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The source ended (exhausted or a read failed mid-run) and every frame reached
    /// the display.
    EndOfStream,
    /// Shutdown was requested from outside (Ctrl-C, `ShutdownSignal::trigger`).
    StopRequested,
    /// The display reported a quit request.
    QuitRequested,
    /// A stage panicked and the run wound down.
    StageFailed { stage: &'static str },
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::EndOfStream => write!(f, "end of stream"),
            StopReason::StopRequested => write!(f, "stop requested"),
            StopReason::QuitRequested => write!(f, "quit requested"),
            StopReason::StageFailed { stage } => write!(f, "{} stage failed", stage),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// The run never started (source unavailable).
    Aborted,
}

/// Sent exactly once per scan, after cleanup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub task_id: String,
    pub outcome: TaskOutcome,
}

/// Summary of one scan.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub task_id: String,
    pub frames_ingested: u64,
    pub frames_processed: u64,
    /// Frames that reached the display stage (presented or, with `show_frame` off, drained).
    pub frames_displayed: u64,
    pub frames_written: u64,
    pub empty_frames_skipped: u64,
    pub detection_failures: u64,
    pub low_confidence_frames: u64,
    pub frames_archived: u64,
    pub final_counter: u64,
    /// Counter increase during this run.
    pub jumps: u64,
    pub elapsed: Duration,
    /// Nominal source fps after fallback.
    pub source_fps: Option<f64>,
    /// Read error that ended the source early, if any.
    pub source_error: Option<String>,
    /// Stages still running when their join timeout expired.
    pub abandoned_stages: Vec<&'static str>,
    pub writer_failed: bool,
    pub stop_reason: StopReason,
}

impl RunReport {
    /// Jumps gained per second of wall time; zero for an instantaneous run.
    pub fn jumps_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.jumps as f64 / secs
        } else {
            0.0
        }
    }
}

/// Counters shared by the stage threads and read once when the report is built.
#[derive(Debug, Default)]
pub(crate) struct RunCounters {
    pub ingested: AtomicU64,
    pub empty_frames: AtomicU64,
    pub processed: AtomicU64,
    pub displayed: AtomicU64,
    pub written: AtomicU64,
    pub detection_failures: AtomicU64,
    pub low_confidence: AtomicU64,
    pub archived: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(jumps: u64, elapsed: Duration) -> RunReport {
        RunReport {
            task_id: "t".into(),
            frames_ingested: 0,
            frames_processed: 0,
            frames_displayed: 0,
            frames_written: 0,
            empty_frames_skipped: 0,
            detection_failures: 0,
            low_confidence_frames: 0,
            frames_archived: 0,
            final_counter: jumps,
            jumps,
            elapsed,
            source_fps: None,
            source_error: None,
            abandoned_stages: Vec::new(),
            writer_failed: false,
            stop_reason: StopReason::EndOfStream,
        }
    }

    #[test]
    fn jumps_per_second_handles_zero_elapsed() {
        assert_eq!(report(5, Duration::ZERO).jumps_per_second(), 0.0);
        assert_eq!(report(5, Duration::from_secs(2)).jumps_per_second(), 2.5);
    }
}
