use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::annotate::{FpsMeter, Overlay, Trail};
use crate::channel::{FrameReceiver, FrameSender, SendOutcome};
use crate::detect::{select_best, Detection, DetectorBackend};
use crate::frame::{Frame, FramePacket};
use crate::jump::JumpDetector;
use crate::report::{bump, read, RunCounters};
use crate::shutdown::ShutdownSignal;
use crate::sink::LowConfidenceArchiver;

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

/// Sentinels pushed to each output when the stage ends.
const OUTPUT_SENTINELS: usize = 2;

/// Archiver and destination for frames below the confidence threshold.
pub(crate) struct ArchiveTarget {
    pub archiver: Box<dyn LowConfidenceArchiver>,
    pub destination: PathBuf,
}

/// One fan-out channel of the detection stage.
pub(crate) struct Output {
    pub name: &'static str,
    pub tx: FrameSender,
}

/// Per-frame detection, jump tracking and annotation.
pub(crate) struct DetectionStage {
    detector: Box<dyn DetectorBackend>,
    jump: JumpDetector,
    trail: Trail,
    fps: FpsMeter,
    overlay: Overlay,
    model_confidence: f32,
    archive: Option<ArchiveTarget>,
    counters: Arc<RunCounters>,
}

impl DetectionStage {
    pub(crate) fn new(
        detector: Box<dyn DetectorBackend>,
        jump: JumpDetector,
        overlay: Overlay,
        model_confidence: f32,
        archive: Option<ArchiveTarget>,
        counters: Arc<RunCounters>,
    ) -> Self {
        Self {
            detector,
            jump,
            trail: Trail::new(),
            fps: FpsMeter::default(),
            overlay,
            model_confidence,
            archive,
            counters,
        }
    }

    /// Run one frame through detection and return the annotated copy.
    pub(crate) fn process(&mut self, frame: Frame) -> Frame {
        let started = Instant::now();

        let detections = match self.detector.detect(&frame) {
            Ok(detections) => detections,
            Err(e) => {
                bump(&self.counters.detection_failures);
                log::warn!("detect: frame {} failed: {:#}", frame.sequence, e);
                Vec::new()
            }
        };

        let mut accepted: Option<Detection> = None;
        if let Some(best) = select_best(&detections) {
            if best.confidence < self.model_confidence {
                bump(&self.counters.low_confidence);
                self.archive_low_confidence(&frame, best.confidence);
            } else if best.confidence > self.model_confidence {
                let (cx, cy) = best.bbox.center();
                self.jump.observe(cy as f64, best.bbox.height() as f64);
                self.trail.push((cx as f64, cy as f64));
                accepted = Some(best.clone());
            }
        }

        let count = self.jump.counter().get();
        let fps = self.fps.record(started.elapsed());
        let overlay = &self.overlay;
        let trail = &self.trail;
        frame.annotate(|image| {
            overlay.draw_counter(image, count);
            overlay.draw_model_label(image);
            if let Some(detection) = &accepted {
                overlay.draw_detection(image, detection);
                overlay.draw_trail(image, trail);
            }
            overlay.draw_fps(image, fps);
        })
    }

    fn archive_low_confidence(&mut self, frame: &Frame, confidence: f32) {
        let Some(target) = self.archive.as_mut() else {
            return;
        };
        match target
            .archiver
            .save(frame, frame.sequence, confidence, &target.destination)
        {
            Ok(_) => bump(&self.counters.archived),
            Err(e) => log::warn!("detect: archiving frame {} failed: {:#}", frame.sequence, e),
        }
    }

    /// Stage loop. Ends on end-of-stream or shutdown, then releases every output
    /// with end-of-stream markers.
    pub(crate) fn run(mut self, rx: FrameReceiver, mut outputs: Vec<Output>, shutdown: ShutdownSignal) {
        if let Err(e) = self.detector.warm_up() {
            log::warn!("detect: {} warm-up failed: {:#}", self.detector.name(), e);
        }
        log::info!("detect: started with {} backend", self.detector.name());

        let mut last_health = Instant::now();
        loop {
            if shutdown.is_triggered() {
                break;
            }
            let frame = match rx.get() {
                FramePacket::Frame(frame) => frame,
                FramePacket::EndOfStream => break,
            };

            let annotated = self.process(frame);
            bump(&self.counters.processed);

            outputs.retain(|output| match output.tx.put(annotated.clone()) {
                SendOutcome::Delivered | SendOutcome::Shutdown => true,
                SendOutcome::Disconnected => {
                    log::warn!("detect: {} output closed, no longer feeding it", output.name);
                    false
                }
            });

            if last_health.elapsed() >= HEALTH_INTERVAL {
                log::info!(
                    "detect: {} frames, counter {}, avg fps {:.1}",
                    read(&self.counters.processed),
                    self.jump.counter().get(),
                    self.fps.average()
                );
                last_health = Instant::now();
            }
        }

        for output in &outputs {
            output.tx.end_of_stream(OUTPUT_SENTINELS);
        }
        log::info!(
            "detect: terminated after {} frames",
            read(&self.counters.processed)
        );
    }
}
