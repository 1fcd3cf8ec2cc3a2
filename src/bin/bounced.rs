//! bounced - count jumps in a video source
//!
//! Opens a source (`stub://` synthetic scene, image-sequence directory, or a video
//! file when built with `ingest-file-ffmpeg`), runs the detection pipeline until the
//! source ends or Ctrl-C is pressed, and prints a run summary.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use bounce_counter::ingest::output_path_for;
use bounce_counter::sink::{HeadlessDisplay, ImageSequenceWriterFactory};
use bounce_counter::ui::Ui;
use bounce_counter::{
    open_source, BackendRegistry, Collaborators, DisplaySink, JumpCounter, Pipeline, ScanConfig,
    WriterTarget,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Source locator: `stub://name?frames=N&fps=F`, an image directory, or a video file.
    source: String,
    /// TOML config file (falls back to BOUNCE_CONFIG).
    #[arg(long, env = "BOUNCE_CONFIG")]
    config: Option<PathBuf>,
    /// Output location for recorded sources (defaults to `<source>_out`).
    #[arg(long)]
    output: Option<PathBuf>,
    /// Skip writing annotated output for recorded sources.
    #[arg(long)]
    no_output: bool,
    /// Do not report progress per frame.
    #[arg(long)]
    headless: bool,
    /// Detector backend name.
    #[arg(long, default_value = "blob")]
    detector: String,
    /// Task identifier used in logs and the completion notice.
    #[arg(long, default_value = "task1")]
    task_id: String,
    /// Print available detector backends and exit.
    #[arg(long)]
    list_detectors: bool,
    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let registry = BackendRegistry::with_builtin();
    if args.list_detectors {
        for name in registry.list() {
            println!("{name}");
        }
        return Ok(());
    }

    let cfg = {
        let _stage = ui.stage("Load config");
        ScanConfig::load_from(args.config.as_deref())?
    };
    let counter = JumpCounter::new(cfg.initial_counter);

    let detector = {
        let _stage = ui.stage("Load detector");
        registry
            .create(&args.detector, &cfg.detector)
            .with_context(|| format!("failed to create detector {}", args.detector))?
    };

    let source = {
        let _stage = ui.stage("Open source");
        open_source(&args.source)?
    };
    let writer = if source.is_recorded() && !args.no_output {
        let path = args
            .output
            .clone()
            .unwrap_or_else(|| output_path_for(source.locator()));
        log::info!("annotated output: {}", path.display());
        Some(WriterTarget::new(ImageSequenceWriterFactory, path))
    } else {
        None
    };

    let (completion_tx, completion_rx) = crossbeam_channel::bounded(1);
    let pipeline = Pipeline::new(cfg, counter.clone())?.with_completion(completion_tx);

    let stop = pipeline.shutdown_signal();
    ctrlc::set_handler(move || {
        if stop.trigger() {
            log::info!("stop requested");
        }
    })
    .expect("error setting Ctrl-C handler");

    let mut headless = HeadlessDisplay::new();
    let mut terminal = ui.scan_display(counter.clone());
    let display: &mut dyn DisplaySink = if args.headless {
        &mut headless
    } else {
        &mut terminal
    };

    let mut collaborators = Collaborators::new(source, detector, display);
    if let Some(writer) = writer {
        collaborators = collaborators.with_writer(writer);
    }

    let report = pipeline.scan(&args.task_id, collaborators)?;
    drop(terminal);

    if let Ok(completion) = completion_rx.try_recv() {
        log::info!("task {} {:?}", completion.task_id, completion.outcome);
    }

    println!("scan summary:");
    println!("  task: {}", report.task_id);
    println!("  stop reason: {}", report.stop_reason);
    println!("  frames ingested: {}", report.frames_ingested);
    println!("  frames processed: {}", report.frames_processed);
    println!("  frames displayed: {}", report.frames_displayed);
    println!("  frames written: {}", report.frames_written);
    if report.empty_frames_skipped > 0 {
        println!("  empty frames skipped: {}", report.empty_frames_skipped);
    }
    if report.detection_failures > 0 {
        println!("  detection failures: {}", report.detection_failures);
    }
    println!(
        "  low-confidence frames: {} ({} archived)",
        report.low_confidence_frames, report.frames_archived
    );
    match report.source_fps {
        Some(fps) => println!("  source fps: {:.2}", fps),
        None => println!("  source fps: unknown"),
    }
    if let Some(error) = &report.source_error {
        println!("  source ended early: {}", error);
    }
    println!("  jumps: {}", report.jumps);
    println!("  counter: {}", report.final_counter);
    println!("  jumps per second: {:.3}", report.jumps_per_second());
    println!("  elapsed: {:.2}s", report.elapsed.as_secs_f64());
    if report.writer_failed {
        println!("  writer: FAILED");
    }
    if !report.abandoned_stages.is_empty() {
        println!("  abandoned stages: {}", report.abandoned_stages.join(", "));
    }
    Ok(())
}
