//! Wall-clock budget and cancellation, observed at stage checkpoints.

use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::error::{PipelineError, PipelineResult};

/// Points at which an invocation may be aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Extraction,
    Detection,
    SequenceInference,
}

impl Checkpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Checkpoint::Extraction => "post_extraction",
            Checkpoint::Detection => "post_detection",
            Checkpoint::SequenceInference => "post_sequence_inference",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
    cancel: Option<watch::Receiver<bool>>,
}

impl Deadline {
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
            cancel: None,
        }
    }

    /// Also abort at checkpoints once `cancel` reads `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Fail with `Cancelled` or `Timeout` if the invocation should stop here.
    pub fn check(&self, checkpoint: Checkpoint) -> PipelineResult<()> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Err(PipelineError::Cancelled(checkpoint.as_str()));
        }

        let elapsed = self.elapsed();
        if elapsed > self.budget {
            return Err(PipelineError::Timeout {
                checkpoint: checkpoint.as_str(),
                elapsed_secs: elapsed.as_secs_f64(),
                budget_secs: self.budget.as_secs_f64(),
            });
        }

        Ok(())
    }
}
