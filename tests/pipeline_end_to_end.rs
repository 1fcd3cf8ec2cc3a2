mod common;

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use bounce_counter::detect::ScriptedBackend;
use bounce_counter::ingest::ImageSequenceSource;
use bounce_counter::sink::{HeadlessDisplay, ImageSequenceWriterFactory};
use bounce_counter::{
    open_source, BackendRegistry, BoundingBox, Collaborators, Completion, Detection,
    FrameSource, JumpCounter, Pipeline, ScanConfig, SourceUnavailable, StopReason, TaskOutcome,
    WriterTarget,
};

use common::{FailingWriterFactory, RecordingDisplay, RecordingWriterFactory, ScriptedSource};

fn det(center_y: f32, confidence: f32) -> Detection {
    let bbox = BoundingBox::new(100.0, center_y - 50.0, 140.0, center_y + 50.0).unwrap();
    Detection::new(bbox, confidence)
}

/// Two low-confidence frames, a baseline, a rise and a landing.
fn one_jump_script() -> ScriptedBackend {
    ScriptedBackend::new(vec![
        vec![det(150.0, 0.5)],
        vec![det(150.0, 0.5)],
        vec![det(150.0, 0.9)],
        vec![det(90.0, 0.9)],
        vec![det(160.0, 0.9)],
    ])
}

fn pipeline(config: ScanConfig) -> (Pipeline, crossbeam_channel::Receiver<Completion>) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let pipeline = Pipeline::new(config, JumpCounter::new(0))
        .unwrap()
        .with_completion(tx);
    (pipeline, rx)
}

#[test]
fn counts_one_jump_and_delivers_every_frame_in_order() {
    let (pipeline, completions) = pipeline(ScanConfig::default());
    let counter = pipeline.counter().clone();
    let source = ScriptedSource::new(5).recorded();
    let closed = source.closed.clone();
    let writer = RecordingWriterFactory::default();
    let mut display = RecordingDisplay::default();

    let collaborators = Collaborators::new(Box::new(source), Box::new(one_jump_script()), &mut display)
        .with_writer(WriterTarget::new(writer.clone(), "clip_out"));
    let report = pipeline.scan("task1", collaborators).expect("scan");

    assert_eq!(report.stop_reason, StopReason::EndOfStream);
    assert_eq!(report.final_counter, 1);
    assert_eq!(counter.get(), 1);
    assert_eq!(report.jumps, 1);
    assert_eq!(report.frames_ingested, 5);
    assert_eq!(report.frames_processed, 5);
    assert_eq!(report.frames_displayed, 5);
    assert_eq!(report.frames_written, 5);
    assert_eq!(report.low_confidence_frames, 2);
    assert_eq!(report.frames_archived, 0);
    assert_eq!(report.source_fps, Some(1000.0));
    assert!(report.abandoned_stages.is_empty());
    assert!(!report.writer_failed);
    assert!(closed.load(Ordering::SeqCst));

    assert_eq!(display.sequences(), vec![1, 2, 3, 4, 5]);
    let log = writer.log.lock().unwrap();
    assert_eq!(log.written, vec![1, 2, 3, 4, 5]);
    assert!(log.closed);
    let (path, fps, width, height) = log.opened.clone().unwrap();
    assert_eq!(path, std::path::PathBuf::from("clip_out"));
    assert_eq!((fps, width, height), (1000.0, 320, 240));

    let completion = completions.try_recv().unwrap();
    assert_eq!(completion.task_id, "task1");
    assert_eq!(completion.outcome, TaskOutcome::Completed);
    assert!(completions.try_recv().is_err());
}

#[test]
fn low_confidence_frames_are_archived_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ScanConfig::default();
    config.save_lowscores = true;
    config.archive.directory = Some(dir.path().to_path_buf());
    let (pipeline, _) = pipeline(config);
    let mut display = RecordingDisplay::default();

    let collaborators = Collaborators::new(
        Box::new(ScriptedSource::new(5)),
        Box::new(one_jump_script()),
        &mut display,
    );
    let report = pipeline.scan("archive", collaborators).unwrap();

    assert_eq!(report.frames_archived, 2);
    assert!(dir.path().join("lowscore_000001_c-0.50.jpg").is_file());
    assert!(dir.path().join("lowscore_000002_c-0.50.jpg").is_file());
    // Low-confidence frames still reach the display.
    assert_eq!(display.sequences().len(), 5);
}

#[test]
fn read_failure_ends_the_stream_and_drains_the_pipeline() {
    let (pipeline, _) = pipeline(ScanConfig::default());
    let writer = RecordingWriterFactory::default();
    let mut display = RecordingDisplay::default();

    let collaborators = Collaborators::new(
        Box::new(ScriptedSource::failing_after(3).recorded()),
        Box::new(ScriptedBackend::default()),
        &mut display,
    )
    .with_writer(WriterTarget::new(writer.clone(), "out"));
    let report = pipeline.scan("failing", collaborators).unwrap();

    assert_eq!(report.stop_reason, StopReason::EndOfStream);
    assert!(report
        .source_error
        .as_deref()
        .is_some_and(|error| error.contains("decoder error after 3 frames")));
    assert_eq!(display.sequences(), vec![1, 2, 3]);
    assert_eq!(writer.log.lock().unwrap().written, vec![1, 2, 3]);
    assert!(report.abandoned_stages.is_empty());
    assert_eq!(report.final_counter, 0);
}

#[test]
fn writer_open_failure_does_not_stop_the_display() {
    let (pipeline, _) = pipeline(ScanConfig::default());
    let mut display = RecordingDisplay::default();

    let collaborators = Collaborators::new(
        Box::new(ScriptedSource::new(8).recorded()),
        Box::new(ScriptedBackend::default()),
        &mut display,
    )
    .with_writer(WriterTarget::new(FailingWriterFactory, "unwritable"));
    let report = pipeline.scan("nowriter", collaborators).unwrap();

    assert!(report.writer_failed);
    assert_eq!(report.frames_written, 0);
    assert_eq!(report.stop_reason, StopReason::EndOfStream);
    assert_eq!(display.sequences(), (1..=8).collect::<Vec<_>>());
}

#[test]
fn live_sources_are_not_written() {
    let (pipeline, _) = pipeline(ScanConfig::default());
    let writer = RecordingWriterFactory::default();
    let mut display = RecordingDisplay::default();

    let collaborators = Collaborators::new(
        Box::new(ScriptedSource::new(3)),
        Box::new(ScriptedBackend::default()),
        &mut display,
    )
    .with_writer(WriterTarget::new(writer.clone(), "live_out"));
    let report = pipeline.scan("live", collaborators).unwrap();

    assert_eq!(report.frames_written, 0);
    assert!(writer.log.lock().unwrap().opened.is_none());
    assert_eq!(display.sequences(), vec![1, 2, 3]);
}

#[test]
fn display_quit_request_stops_the_run() {
    let (pipeline, _) = pipeline(ScanConfig::default());
    let shutdown = pipeline.shutdown_signal();
    let mut display = RecordingDisplay::quitting_after(2);

    let collaborators = Collaborators::new(
        Box::new(ScriptedSource::unbounded()),
        Box::new(ScriptedBackend::default()),
        &mut display,
    );
    let report = pipeline.scan("quit", collaborators).unwrap();

    assert_eq!(report.stop_reason, StopReason::QuitRequested);
    assert_eq!(display.sequences(), vec![1, 2]);
    assert!(shutdown.is_triggered());
    assert!(report.abandoned_stages.is_empty());
}

#[test]
fn external_stop_ends_an_unbounded_run() {
    let (pipeline, completions) = pipeline(ScanConfig::default());
    let stop = pipeline.shutdown_signal();
    let mut display = HeadlessDisplay::new();

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        stop.trigger();
    });
    let collaborators = Collaborators::new(
        Box::new(ScriptedSource::unbounded()),
        Box::new(ScriptedBackend::default()),
        &mut display,
    );
    let report = pipeline.scan("stop", collaborators).unwrap();
    stopper.join().unwrap();

    assert_eq!(report.stop_reason, StopReason::StopRequested);
    assert!(report.frames_processed > 0);
    assert!(report.abandoned_stages.is_empty());
    assert_eq!(
        completions.try_recv().unwrap().outcome,
        TaskOutcome::Completed
    );
}

#[test]
fn stop_requested_twice_completes_once() {
    let (pipeline, completions) = pipeline(ScanConfig::default());
    let stop = pipeline.shutdown_signal();
    let late_stop = stop.clone();
    let mut display = RecordingDisplay::quitting_after(3);

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(5));
        stop.trigger()
    });
    let collaborators = Collaborators::new(
        Box::new(ScriptedSource::unbounded()),
        Box::new(ScriptedBackend::default()),
        &mut display,
    );
    let report = pipeline.scan("twice", collaborators).unwrap();
    stopper.join().unwrap();

    // Whichever trigger lands first, the run stops once and cleanly.
    assert!(matches!(
        report.stop_reason,
        StopReason::StopRequested | StopReason::QuitRequested
    ));
    assert!(report.abandoned_stages.is_empty());
    assert!(!late_stop.trigger());
    assert!(display.sequences().len() <= 3);
    assert_eq!(completions.try_recv().unwrap().outcome, TaskOutcome::Completed);
    assert!(completions.try_recv().is_err());
}

#[test]
fn tiny_source_rate_still_processes_every_frame() {
    let source = open_source("stub://slow?frames=3&fps=1e-20").unwrap();
    let (pipeline, _) = pipeline(ScanConfig::default());
    let mut display = HeadlessDisplay::new();

    let report = pipeline
        .scan(
            "slow",
            Collaborators::new(source, Box::new(ScriptedBackend::default()), &mut display),
        )
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::EndOfStream);
    assert_eq!(report.frames_ingested, 3);
    assert_eq!(display.presented(), 3);
    assert_eq!(report.source_fps, Some(1e-20));
    assert!(report.abandoned_stages.is_empty());
}

#[test]
fn unavailable_source_aborts_before_any_stage_starts() {
    let (pipeline, completions) = pipeline(ScanConfig::default());
    let mut display = RecordingDisplay::default();
    let source = ScriptedSource::new(0);
    let closed = source.closed.clone();

    let collaborators = Collaborators::new(
        Box::new(source),
        Box::new(ScriptedBackend::default()),
        &mut display,
    );
    let err = pipeline.scan("empty", collaborators).unwrap_err();

    let unavailable = err.downcast_ref::<SourceUnavailable>().expect("SourceUnavailable");
    assert_eq!(unavailable.locator, "scripted://clip");
    assert!(closed.load(Ordering::SeqCst));
    assert!(display.sequences().is_empty());

    let completion = completions.try_recv().unwrap();
    assert_eq!(completion.outcome, TaskOutcome::Aborted);
}

#[test]
fn synthetic_scene_counts_jumps_with_blob_detector() {
    let config = ScanConfig::default();
    let detector = BackendRegistry::with_builtin()
        .create("blob", &config.detector)
        .unwrap();
    let source = open_source("stub://court?frames=60&fps=1000").unwrap();
    let (pipeline, _) = pipeline(config);
    let mut display = HeadlessDisplay::new();

    let report = pipeline
        .scan("synthetic", Collaborators::new(source, detector, &mut display))
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::EndOfStream);
    assert_eq!(report.frames_processed, 60);
    assert_eq!(report.jumps, 2);
    assert_eq!(display.presented(), 60);
}

#[test]
fn image_sequence_output_replays_as_a_source() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("clip_out");
    let (pipeline, _) = pipeline(ScanConfig::default());
    let mut display = HeadlessDisplay::new();

    let collaborators = Collaborators::new(
        Box::new(ScriptedSource::new(4).recorded()),
        Box::new(ScriptedBackend::default()),
        &mut display,
    )
    .with_writer(WriterTarget::new(ImageSequenceWriterFactory, &out));
    let report = pipeline.scan("replay", collaborators).unwrap();
    assert_eq!(report.frames_written, 4);

    let replay = ImageSequenceSource::open(out.to_str().unwrap()).unwrap();
    assert_eq!(replay.len(), 4);
    assert_eq!(replay.frame_rate(), 1000.0);
    assert!(replay.is_recorded());
}
