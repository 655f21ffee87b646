use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::ObjectObservation;
use crate::frame::InferenceView;

/// Stub backend for testing. Replays a script of per-frame answers.
///
/// Once the script runs out every frame gets the fallback answer (empty unless
/// set with `otherwise`).
#[derive(Default)]
pub struct StubBackend {
    script: VecDeque<Result<Vec<ObjectObservation>, String>>,
    fallback: Vec<ObjectObservation>,
    warm_up_failure: Option<String>,
    delay: Duration,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next unscripted frame with `observations`.
    pub fn then_detect(mut self, observations: Vec<ObjectObservation>) -> Self {
        self.script.push_back(Ok(observations));
        self
    }

    /// Fail the next unscripted frame.
    pub fn then_fail(mut self, reason: impl Into<String>) -> Self {
        self.script.push_back(Err(reason.into()));
        self
    }

    pub fn otherwise(mut self, observations: Vec<ObjectObservation>) -> Self {
        self.fallback = observations;
        self
    }

    pub fn with_warm_up_failure(mut self, reason: impl Into<String>) -> Self {
        self.warm_up_failure = Some(reason.into());
        self
    }

    /// Simulate a slow model.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _view: InferenceView<'_>) -> Result<Vec<ObjectObservation>> {
        self.calls += 1;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match self.script.pop_front() {
            Some(Ok(observations)) => Ok(observations),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Ok(self.fallback.clone()),
        }
    }

    fn warm_up(&mut self) -> Result<()> {
        match &self.warm_up_failure {
            Some(reason) => Err(anyhow!("{}", reason)),
            None => Ok(()),
        }
    }
}
