//! Execution device selection for inference.

use std::fmt;

/// Where an inference call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionDevice {
    /// Compute accelerator (CUDA when built with the `cuda` feature)
    Accelerator,
    /// Non-accelerated execution path
    #[default]
    Cpu,
}

impl ExecutionDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionDevice::Accelerator => "accelerator",
            ExecutionDevice::Cpu => "cpu",
        }
    }

    pub fn is_accelerator(&self) -> bool {
        matches!(self, ExecutionDevice::Accelerator)
    }
}

impl fmt::Display for ExecutionDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
