use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// One scripted response.
#[derive(Clone, Debug)]
pub enum ScriptedResponse {
    Detections(Vec<Detection>),
    Failure(String),
}

/// Backend that replays a fixed script, one entry per frame, for tests and dry runs.
///
/// Once the script is exhausted every further frame has no detections.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: VecDeque<ScriptedResponse>,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self::from_responses(frames.into_iter().map(ScriptedResponse::Detections).collect())
    }

    pub fn from_responses(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            script: responses.into(),
            calls: 0,
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(ScriptedResponse::Detections(detections)) => Ok(detections),
            Some(ScriptedResponse::Failure(message)) => Err(anyhow!(message)),
            None => Ok(Vec::new()),
        }
    }
}
