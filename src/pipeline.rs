//! Pipeline controller.
//!
//! Wires a source through ingest and detection to the display and (for recorded
//! media) the writer:
//!
//! ```text
//! source -> [ingest] -> frames -> [detect] -+-> display (controller thread)
//!                                           +-> writer  -> [writer]
//! ```
//!
//! Every arrow is a bounded channel. A run ends when the display sees end of
//! stream, the display asks to quit, or the shutdown signal is triggered. The
//! controller then triggers shutdown, joins each stage with a bounded wait, and
//! sends one completion notification.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::annotate::Overlay;
use crate::channel::frame_channel;
use crate::config::ScanConfig;
use crate::detect::stage::{ArchiveTarget, DetectionStage, Output};
use crate::detect::DetectorBackend;
use crate::ingest::stage::{prime, run_ingest, IngestEnd};
use crate::ingest::FrameSource;
use crate::jump::{JumpCounter, JumpDetector};
use crate::report::{read, Completion, RunCounters, RunReport, StopReason, TaskOutcome};
use crate::shutdown::ShutdownSignal;
use crate::sink::display::{run_display, DisplayEnd};
use crate::sink::writer::run_writer;
use crate::sink::{default_archive_dir, DisplaySink, JpegArchiver, LowConfidenceArchiver, WriterTarget};

pub const INGEST_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DETECT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
pub const WRITER_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// External collaborators for one scan.
pub struct Collaborators<'a> {
    pub source: Box<dyn FrameSource>,
    pub detector: Box<dyn DetectorBackend>,
    pub display: &'a mut dyn DisplaySink,
    /// Output for recorded sources; ignored for live ones.
    pub writer: Option<WriterTarget>,
    /// Replaces the default JPEG archiver when `save_lowscores` is on.
    pub archiver: Option<Box<dyn LowConfidenceArchiver>>,
}

impl<'a> Collaborators<'a> {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectorBackend>,
        display: &'a mut dyn DisplaySink,
    ) -> Self {
        Self {
            source,
            detector,
            display,
            writer: None,
            archiver: None,
        }
    }

    pub fn with_writer(mut self, writer: WriterTarget) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_archiver(mut self, archiver: impl LowConfidenceArchiver + 'static) -> Self {
        self.archiver = Some(Box::new(archiver));
        self
    }
}

/// One scan. Consumed by [`Pipeline::scan`].
pub struct Pipeline {
    config: ScanConfig,
    counter: JumpCounter,
    shutdown: ShutdownSignal,
    completion: Option<Sender<Completion>>,
}

impl Pipeline {
    pub fn new(config: ScanConfig, counter: JumpCounter) -> Result<Self> {
        config.validate().context("invalid scan configuration")?;
        Ok(Self {
            config,
            counter,
            shutdown: ShutdownSignal::new(),
            completion: None,
        })
    }

    /// Channel receiving the completion notification.
    pub fn with_completion(mut self, tx: Sender<Completion>) -> Self {
        self.completion = Some(tx);
        self
    }

    /// Handle for stopping the run from another thread.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn counter(&self) -> &JumpCounter {
        &self.counter
    }

    /// Run the scan to completion on the calling thread.
    ///
    /// Returns an error when the source is unavailable or a stage thread cannot be
    /// spawned; every later failure is reported in the [`RunReport`].
    pub fn scan(self, task_id: &str, collaborators: Collaborators<'_>) -> Result<RunReport> {
        let started_at = Instant::now();
        let counter_at_start = self.counter.get();
        let Collaborators {
            source,
            detector,
            display,
            writer,
            archiver,
        } = collaborators;

        let locator = source.locator().to_string();
        let recorded = source.is_recorded();
        log::info!("scan {}: opening {}", task_id, locator);

        let primed = match prime(source) {
            Ok(primed) => primed,
            Err(e) => {
                log::error!("scan {}: {:#}", task_id, e);
                self.notify(task_id, TaskOutcome::Aborted);
                return Err(e);
            }
        };

        let counters = Arc::new(RunCounters::default());
        let fps_cell = Arc::new(OnceLock::new());
        let capacity = self.config.channel_capacity;

        let (frames_tx, frames_rx) = frame_channel(capacity, self.shutdown.clone());
        let (display_tx, display_rx) = frame_channel(capacity, self.shutdown.clone());

        let mut outputs = Vec::new();
        let mut writer_stage = None;
        match writer {
            Some(target) if recorded => {
                let (writer_tx, writer_rx) = frame_channel(capacity, self.shutdown.clone());
                outputs.push(Output {
                    name: "writer",
                    tx: writer_tx,
                });
                let fps = fps_cell.clone();
                let stage_counters = counters.clone();
                let WriterTarget { factory, path } = target;
                writer_stage = Some(spawn_stage("writer", move || {
                    run_writer(writer_rx, factory, path, fps, stage_counters)
                })?);
            }
            Some(target) => {
                log::info!(
                    "scan {}: live source, not writing {}",
                    task_id,
                    target.path.display()
                );
            }
            None => {}
        }
        outputs.push(Output {
            name: "display",
            tx: display_tx,
        });

        let overlay = self.build_overlay(detector.name().to_string());
        let detection = DetectionStage::new(
            detector,
            JumpDetector::new(self.config.relative_jump_threshold, self.counter.clone()),
            overlay,
            self.config.model_confidence,
            self.archive_target(archiver, &locator, recorded),
            counters.clone(),
        );

        let detect_shutdown = self.shutdown.clone();
        let detect_stage = spawn_stage("detect", move || {
            detection.run(frames_rx, outputs, detect_shutdown)
        });
        let detect_stage = match detect_stage {
            Ok(stage) => stage,
            Err(e) => {
                let running = writer_stage
                    .into_iter()
                    .map(|stage| started(stage, WRITER_JOIN_TIMEOUT))
                    .collect();
                return Err(self.abort_started(task_id, e, running));
            }
        };

        let ingest_shutdown = self.shutdown.clone();
        let ingest_fps = fps_cell.clone();
        let ingest_counters = counters.clone();
        let ingest_stage = spawn_stage("ingest", move || {
            run_ingest(primed, frames_tx, ingest_fps, ingest_shutdown, ingest_counters)
        });
        let ingest_stage = match ingest_stage {
            Ok(stage) => stage,
            Err(e) => {
                drop(display_rx);
                let mut running = vec![started(detect_stage, DETECT_JOIN_TIMEOUT)];
                running.extend(
                    writer_stage
                        .into_iter()
                        .map(|stage| started(stage, WRITER_JOIN_TIMEOUT)),
                );
                return Err(self.abort_started(task_id, e, running));
            }
        };

        log::info!("scan {}: all stages started", task_id);
        let display_end = run_display(
            &display_rx,
            display,
            self.config.show_frame,
            &self.shutdown,
            &counters,
        );
        log::info!("scan {}: display ended ({:?}), shutting down", task_id, display_end);
        self.shutdown.trigger();
        drop(display_rx);

        let mut abandoned = Vec::new();
        let mut failed_stage = None;
        let mut source_error = None;

        match ingest_stage.join_within(INGEST_JOIN_TIMEOUT) {
            StageExit::Finished(IngestEnd::ReadFailed(error)) => source_error = Some(error),
            StageExit::Finished(_) => {}
            StageExit::Panicked => failed_stage = Some("ingest"),
            StageExit::Abandoned => abandoned.push("ingest"),
        }
        match detect_stage.join_within(DETECT_JOIN_TIMEOUT) {
            StageExit::Finished(()) => {}
            StageExit::Panicked => failed_stage = failed_stage.or(Some("detect")),
            StageExit::Abandoned => abandoned.push("detect"),
        }
        let mut writer_failed = false;
        if let Some(stage) = writer_stage {
            match stage.join_within(WRITER_JOIN_TIMEOUT) {
                StageExit::Finished(end) => writer_failed = end.failed(),
                StageExit::Panicked => writer_failed = true,
                StageExit::Abandoned => abandoned.push("writer"),
            }
        }

        let stop_reason = match display_end {
            DisplayEnd::QuitRequested => StopReason::QuitRequested,
            DisplayEnd::StopRequested => StopReason::StopRequested,
            DisplayEnd::EndOfStream => match failed_stage {
                Some(stage) => StopReason::StageFailed { stage },
                None => StopReason::EndOfStream,
            },
        };

        let final_counter = self.counter.get();
        let report = RunReport {
            task_id: task_id.to_string(),
            frames_ingested: read(&counters.ingested),
            frames_processed: read(&counters.processed),
            frames_displayed: read(&counters.displayed),
            frames_written: read(&counters.written),
            empty_frames_skipped: read(&counters.empty_frames),
            detection_failures: read(&counters.detection_failures),
            low_confidence_frames: read(&counters.low_confidence),
            frames_archived: read(&counters.archived),
            final_counter,
            jumps: final_counter.saturating_sub(counter_at_start),
            elapsed: started_at.elapsed(),
            source_fps: fps_cell.get().copied(),
            source_error,
            abandoned_stages: abandoned,
            writer_failed,
            stop_reason,
        };

        if !report.abandoned_stages.is_empty() {
            log::warn!(
                "scan {}: abandoned stages after join timeout: {}",
                task_id,
                report.abandoned_stages.join(", ")
            );
        }
        log::info!(
            "scan {}: {} ({} frames, {} jumps)",
            task_id,
            report.stop_reason,
            report.frames_processed,
            report.jumps
        );
        self.notify(task_id, TaskOutcome::Completed);
        Ok(report)
    }

    fn build_overlay(&self, label: String) -> Overlay {
        match &self.config.overlay.font_path {
            Some(path) => match Overlay::with_font_file(label.clone(), path) {
                Ok(overlay) => overlay,
                Err(e) => {
                    log::warn!("overlay text disabled: {:#}", e);
                    Overlay::new(label)
                }
            },
            None => Overlay::new(label),
        }
    }

    fn archive_target(
        &self,
        archiver: Option<Box<dyn LowConfidenceArchiver>>,
        locator: &str,
        recorded: bool,
    ) -> Option<ArchiveTarget> {
        if !self.config.save_lowscores {
            return None;
        }
        let destination: PathBuf = self
            .config
            .archive
            .directory
            .clone()
            .unwrap_or_else(|| default_archive_dir(locator, recorded));
        Some(ArchiveTarget {
            archiver: archiver.unwrap_or_else(|| Box::new(JpegArchiver::new())),
            destination,
        })
    }

    /// Stop a run that failed after some stages were started: trigger shutdown, join
    /// what is running, and send the `Aborted` completion.
    fn abort_started(
        &self,
        task_id: &str,
        error: anyhow::Error,
        running: Vec<(Box<dyn StartedStage>, Duration)>,
    ) -> anyhow::Error {
        log::error!("scan {}: {:#}", task_id, error);
        self.shutdown.trigger();
        for (stage, timeout) in running {
            stage.finish(timeout);
        }
        self.notify(task_id, TaskOutcome::Aborted);
        error
    }

    fn notify(&self, task_id: &str, outcome: TaskOutcome) {
        if let Some(tx) = &self.completion {
            let completion = Completion {
                task_id: task_id.to_string(),
                outcome,
            };
            if tx.send(completion).is_err() {
                log::warn!("scan {}: completion receiver is gone", task_id);
            }
        }
    }
}

/// Result of a bounded join.
#[derive(Debug)]
enum StageExit<T> {
    Finished(T),
    Panicked,
    /// Still running at the deadline; the thread is detached.
    Abandoned,
}

struct StageHandle<T> {
    name: &'static str,
    done: Receiver<thread::Result<T>>,
    handle: JoinHandle<()>,
}

fn spawn_stage<T, F>(name: &'static str, body: F) -> Result<StageHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, done) = bounded(1);
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(body));
            let _ = tx.send(result);
        })
        .with_context(|| format!("failed to spawn {} stage", name))?;
    Ok(StageHandle { name, done, handle })
}

/// A started stage whose result no longer matters.
trait StartedStage {
    fn finish(self: Box<Self>, timeout: Duration);
}

impl<T> StartedStage for StageHandle<T> {
    fn finish(self: Box<Self>, timeout: Duration) {
        let _ = self.join_within(timeout);
    }
}

fn started<T: 'static>(stage: StageHandle<T>, timeout: Duration) -> (Box<dyn StartedStage>, Duration) {
    (Box::new(stage), timeout)
}

impl<T> StageHandle<T> {
    fn join_within(self, timeout: Duration) -> StageExit<T> {
        match self.done.recv_timeout(timeout) {
            Ok(Ok(value)) => {
                let _ = self.handle.join();
                StageExit::Finished(value)
            }
            Ok(Err(_)) | Err(RecvTimeoutError::Disconnected) => {
                log::error!("{} stage panicked", self.name);
                let _ = self.handle.join();
                StageExit::Panicked
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "{} stage did not stop within {:?}; abandoning it",
                    self.name,
                    timeout
                );
                StageExit::Abandoned
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_within_reports_each_exit() {
        let ok = spawn_stage("ok", || 7).unwrap();
        assert!(matches!(ok.join_within(Duration::from_secs(1)), StageExit::Finished(7)));

        let boom = spawn_stage("boom", || -> u32 { panic!("stage blew up") }).unwrap();
        assert!(matches!(boom.join_within(Duration::from_secs(1)), StageExit::Panicked));

        let slow = spawn_stage("slow", || thread::sleep(Duration::from_millis(500))).unwrap();
        assert!(matches!(slow.join_within(Duration::from_millis(20)), StageExit::Abandoned));
    }

    #[test]
    fn aborting_after_start_joins_stages_and_notifies_once() {
        let (completion_tx, completions) = bounded(2);
        let pipeline = Pipeline::new(ScanConfig::default(), JumpCounter::new(0))
            .unwrap()
            .with_completion(completion_tx);

        let stop = pipeline.shutdown_signal();
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let writer_finished = finished.clone();
        let writer = spawn_stage("writer", move || {
            while stop.is_running() {
                thread::sleep(Duration::from_millis(5));
            }
            writer_finished.store(true, std::sync::atomic::Ordering::SeqCst);
        })
        .unwrap();

        let err = pipeline.abort_started(
            "spawn",
            anyhow::anyhow!("failed to spawn detect stage"),
            vec![started(writer, Duration::from_secs(2))],
        );

        assert!(err.to_string().contains("detect"));
        assert!(pipeline.shutdown_signal().is_triggered());
        assert!(finished.load(std::sync::atomic::Ordering::SeqCst));
        let completion = completions.try_recv().unwrap();
        assert_eq!(completion.task_id, "spawn");
        assert_eq!(completion.outcome, TaskOutcome::Aborted);
        assert!(completions.try_recv().is_err());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = ScanConfig::default();
        config.relative_jump_threshold = -1.0;
        assert!(Pipeline::new(config, JumpCounter::new(0)).is_err());
    }
}
