//! Jump detection.
//!
//! `JumpDetector` is a two-state machine fed with the vertical centre of the tracked
//! subject. It compares the oldest and newest samples of a short position history:
//! a rise larger than `bbox_height / relative_threshold` marks take-off, and the
//! first sample lower than the oldest one after take-off is a landing. Each landing
//! increments the shared [`JumpCounter`] exactly once.
//!
//! Image coordinates grow downward, so "rising" means a smaller `y`.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::frame::SampleRing;

/// Number of vertical samples kept for the oldest/newest comparison.
pub const POSITION_HISTORY: usize = 10;

/// Default divisor applied to the bounding-box height.
pub const DEFAULT_RELATIVE_THRESHOLD: f64 = 2.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JumpState {
    Grounded,
    Ascending,
}

/// Transition produced by one observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JumpEvent {
    TookOff,
    /// A full jump completed; `count` is the counter value after the increment.
    Landed { count: u64 },
}

/// Shared jump counter.
///
/// Readable from any stage. Only [`JumpDetector`] increments it; the operator may
/// overwrite or adjust it between or during runs.
#[derive(Clone, Debug, Default)]
pub struct JumpCounter {
    value: Arc<AtomicU64>,
}

impl JumpCounter {
    pub fn new(initial: u64) -> Self {
        Self {
            value: Arc::new(AtomicU64::new(initial)),
        }
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Operator reset to an absolute value.
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::SeqCst);
        log::info!("jump counter set to {}", value);
    }

    /// Operator correction by a signed delta. Results below zero are rejected and
    /// leave the counter untouched.
    pub fn adjust(&self, delta: i64) -> Result<u64> {
        let mut current = self.get();
        loop {
            let next = i128::from(current) + i128::from(delta);
            if next < 0 {
                bail!(
                    "counter adjustment {} would make the counter negative (current {})",
                    delta,
                    current
                );
            }
            let next = u64::try_from(next).unwrap_or(u64::MAX);
            match self
                .value
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Ok(next),
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn record_jump(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Rise/fall state machine over the last [`POSITION_HISTORY`] vertical centres.
#[derive(Debug)]
pub struct JumpDetector {
    history: SampleRing<f64>,
    state: JumpState,
    relative_threshold: f64,
    counter: JumpCounter,
}

impl JumpDetector {
    /// `relative_threshold` must be finite and positive; configuration validation
    /// guarantees this before a detector is built.
    pub fn new(relative_threshold: f64, counter: JumpCounter) -> Self {
        Self {
            history: SampleRing::new(POSITION_HISTORY),
            state: JumpState::Grounded,
            relative_threshold,
            counter,
        }
    }

    pub fn state(&self) -> JumpState {
        self.state
    }

    pub fn counter(&self) -> &JumpCounter {
        &self.counter
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Feed the vertical centre `y` of the selected box and its height.
    pub fn observe(&mut self, y: f64, bbox_height: f64) -> Option<JumpEvent> {
        self.history.push(y);
        let (oldest, newest) = match (self.history.oldest(), self.history.newest()) {
            (Some(o), Some(n)) => (*o, *n),
            _ => return None,
        };
        let threshold = bbox_height / self.relative_threshold;

        if newest < oldest - threshold {
            if self.state == JumpState::Grounded {
                self.state = JumpState::Ascending;
                log::debug!("take-off: y {:.1} -> {:.1} (threshold {:.1})", oldest, newest, threshold);
                return Some(JumpEvent::TookOff);
            }
            return None;
        }

        if newest > oldest && self.state == JumpState::Ascending {
            self.state = JumpState::Grounded;
            let count = self.counter.record_jump();
            log::info!("jump landed, counter now {}", count);
            return Some(JumpEvent::Landed { count });
        }

        None
    }

    /// Forget position history and return to `Grounded`. The counter is untouched.
    pub fn reset(&mut self) {
        self.history.clear();
        self.state = JumpState::Grounded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> JumpDetector {
        JumpDetector::new(DEFAULT_RELATIVE_THRESHOLD, JumpCounter::new(0))
    }

    #[test]
    fn ascends_only_when_rise_exceeds_threshold() {
        let mut d = detector();
        // height 100, threshold 2 => rise must exceed 50 px.
        assert_eq!(d.observe(200.0, 100.0), None);
        assert_eq!(d.observe(160.0, 100.0), None);
        assert_eq!(d.observe(150.0, 100.0), None);
        assert_eq!(d.state(), JumpState::Grounded);
        assert_eq!(d.observe(149.0, 100.0), Some(JumpEvent::TookOff));
        assert_eq!(d.state(), JumpState::Ascending);
    }

    #[test]
    fn rise_then_fall_counts_once() {
        let mut d = detector();
        d.observe(200.0, 100.0);
        assert_eq!(d.observe(140.0, 100.0), Some(JumpEvent::TookOff));
        // Still ascending; repeated qualifying rises are idempotent.
        assert_eq!(d.observe(130.0, 100.0), None);
        assert_eq!(d.observe(210.0, 100.0), Some(JumpEvent::Landed { count: 1 }));
        assert_eq!(d.state(), JumpState::Grounded);
        // Further low samples do not count again without a new take-off.
        assert_eq!(d.observe(220.0, 100.0), None);
        assert_eq!(d.observe(230.0, 100.0), None);
        assert_eq!(d.counter().get(), 1);
    }

    #[test]
    fn no_landing_while_grounded() {
        let mut d = detector();
        for y in [200.0, 205.0, 210.0, 215.0] {
            assert_eq!(d.observe(y, 100.0), None);
        }
        assert_eq!(d.counter().get(), 0);
    }

    #[test]
    fn history_is_bounded_and_oldest_slides() {
        let mut d = detector();
        for _ in 0..25 {
            d.observe(200.0, 100.0);
        }
        assert_eq!(d.history_len(), POSITION_HISTORY);

        // A slow drift upward never exceeds the threshold within the window.
        let mut y = 200.0;
        for _ in 0..40 {
            y -= 5.0;
            d.observe(y, 100.0);
            assert_eq!(d.state(), JumpState::Grounded);
        }
    }

    #[test]
    fn counter_is_shared_with_detector() {
        let counter = JumpCounter::new(7);
        let mut d = JumpDetector::new(2.0, counter.clone());
        d.observe(200.0, 100.0);
        d.observe(100.0, 100.0);
        d.observe(250.0, 100.0);
        assert_eq!(counter.get(), 8);
    }

    #[test]
    fn adjust_rejects_negative_results() {
        let counter = JumpCounter::new(2);
        assert_eq!(counter.adjust(3).unwrap(), 5);
        assert_eq!(counter.adjust(-5).unwrap(), 0);
        assert!(counter.adjust(-1).is_err());
        assert_eq!(counter.get(), 0);
        counter.set(42);
        assert_eq!(counter.get(), 42);
    }
}
