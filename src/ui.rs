//! Terminal progress output: stage spinners and the live scan display.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::jump::JumpCounter;
use crate::sink::DisplaySink;

/// Frames between progress lines in plain mode.
const PLAIN_EVERY: u64 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = spinner(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Display sink that reports scan progress on stderr.
    pub fn scan_display(&self, counter: JumpCounter) -> TerminalDisplay {
        let spinner = self.use_pretty().then(|| spinner("waiting for frames…".to_string()));
        TerminalDisplay {
            spinner,
            counter,
            presented: 0,
            started: Instant::now(),
        }
    }
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(message);
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

/// Live scan display: a spinner line with frame and counter in pretty mode, a log
/// line every 30 frames otherwise.
pub struct TerminalDisplay {
    spinner: Option<ProgressBar>,
    counter: JumpCounter,
    presented: u64,
    started: Instant,
}

impl TerminalDisplay {
    pub fn presented(&self) -> u64 {
        self.presented
    }

    fn status(&self, frame: &Frame) -> String {
        let secs = self.started.elapsed().as_secs_f64();
        let jps = if secs > 0.0 {
            self.counter.get() as f64 / secs
        } else {
            0.0
        };
        format!(
            "frame {} ({}x{}) · counter {} · {:.2} jumps/s",
            frame.sequence,
            frame.width(),
            frame.height(),
            self.counter.get(),
            jps
        )
    }
}

impl DisplaySink for TerminalDisplay {
    fn present(&mut self, frame: &Frame) -> Result<()> {
        self.presented += 1;
        match &self.spinner {
            Some(spinner) => spinner.set_message(self.status(frame)),
            None if self.presented % PLAIN_EVERY == 1 => log::info!("{}", self.status(frame)),
            None => {}
        }
        Ok(())
    }
}

impl Drop for TerminalDisplay {
    fn drop(&mut self) {
        if let Some(spinner) = &self.spinner {
            spinner.finish_and_clear();
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
