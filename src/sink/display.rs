use anyhow::Result;
use std::time::Duration;

use super::DisplaySink;
use crate::channel::{FrameReceiver, Received};
use crate::frame::Frame;
use crate::report::{bump, RunCounters};
use crate::shutdown::ShutdownSignal;

/// Wait per `get` before re-checking the shutdown signal.
pub(crate) const DISPLAY_POLL: Duration = Duration::from_secs(1);

/// How the display loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DisplayEnd {
    EndOfStream,
    StopRequested,
    QuitRequested,
}

/// Display loop, run on the controller thread.
///
/// With `show_frame` off, frames are drained without being presented so the
/// detection stage never blocks on this channel. A failing `present` disables
/// presentation for the rest of the run.
pub(crate) fn run_display(
    rx: &FrameReceiver,
    display: &mut dyn DisplaySink,
    show_frame: bool,
    shutdown: &ShutdownSignal,
    counters: &RunCounters,
) -> DisplayEnd {
    let mut presenting = show_frame;
    loop {
        if shutdown.is_triggered() {
            return DisplayEnd::StopRequested;
        }
        let frame = match rx.get_timeout(DISPLAY_POLL) {
            Received::TimedOut => continue,
            Received::EndOfStream => return DisplayEnd::EndOfStream,
            Received::Frame(frame) => frame,
        };
        bump(&counters.displayed);
        if presenting {
            if let Err(e) = display.present(&frame) {
                log::error!("display failed on frame {}: {:#}; presentation disabled", frame.sequence, e);
                presenting = false;
            }
        }
        if display.poll_quit_requested() {
            log::info!("quit requested by display");
            shutdown.trigger();
            return DisplayEnd::QuitRequested;
        }
    }
}

/// Display that presents nothing. For batch runs and tests.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    presented: u64,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl DisplaySink for HeadlessDisplay {
    fn present(&mut self, _frame: &Frame) -> Result<()> {
        self.presented += 1;
        Ok(())
    }
}
