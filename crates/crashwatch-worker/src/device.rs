//! Accelerator/CPU device selection with one bounded fallback.

use crashwatch_media::{ExecutionDevice, MediaResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PipelineError, PipelineResult};
use crate::metrics;

/// Inference stages that run on an execution device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Detection,
    SequenceInference,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Detection => "detection",
            Stage::SequenceInference => "sequence_inference",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePolicy {
    /// Start on the accelerator
    pub accelerator_enabled: bool,
    /// Retry once on CPU after accelerator exhaustion
    pub cpu_fallback_enabled: bool,
}

impl Default for DevicePolicy {
    fn default() -> Self {
        Self {
            accelerator_enabled: true,
            cpu_fallback_enabled: true,
        }
    }
}

impl DevicePolicy {
    pub fn cpu_only() -> Self {
        Self {
            accelerator_enabled: false,
            cpu_fallback_enabled: false,
        }
    }
}

/// Per-invocation device state.
///
/// Starts on the accelerator when the policy allows it. The first exhaustion
/// releases device memory and moves to CPU for the rest of the invocation;
/// exhaustion on CPU is fatal.
#[derive(Debug, Clone)]
pub struct DeviceSelector {
    policy: DevicePolicy,
    current: ExecutionDevice,
    fell_back: bool,
}

impl DeviceSelector {
    pub fn new(policy: DevicePolicy) -> Self {
        let current = if policy.accelerator_enabled {
            ExecutionDevice::Accelerator
        } else {
            ExecutionDevice::Cpu
        };

        Self {
            policy,
            current,
            fell_back: false,
        }
    }

    pub fn current(&self) -> ExecutionDevice {
        self.current
    }

    pub fn fell_back(&self) -> bool {
        self.fell_back
    }

    /// Run `op` on the current device, retrying once on CPU after exhaustion.
    pub fn run<T>(
        &mut self,
        stage: Stage,
        release: impl FnOnce(),
        mut op: impl FnMut(ExecutionDevice) -> MediaResult<T>,
    ) -> PipelineResult<T> {
        let err = match op(self.current) {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let can_fall_back =
            err.is_resource_exhausted() && self.current.is_accelerator() && self.policy.cpu_fallback_enabled;
        if !can_fall_back {
            return Err(PipelineError::from_media(stage.as_str(), err));
        }

        warn!(
            stage = stage.as_str(),
            error = %err,
            "Accelerator exhausted, releasing device memory and retrying on CPU"
        );
        release();
        self.current = ExecutionDevice::Cpu;
        self.fell_back = true;
        metrics::record_device_fallback(stage.as_str());

        op(ExecutionDevice::Cpu).map_err(|e| PipelineError::from_media(stage.as_str(), e))
    }
}
