//! ONNX Runtime session loading per execution device.

use std::path::Path;
use std::sync::Mutex;

use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use tracing::{info, warn};

use crate::device::ExecutionDevice;
use crate::error::{is_out_of_memory_message, MediaError, MediaResult};

/// A CPU session plus an optional accelerated session for the same model.
///
/// Both are loaded once and shared; callers pick the device per call.
pub(crate) struct DeviceSessions {
    cpu: Mutex<Session>,
    accelerator: Option<Mutex<Session>>,
}

impl DeviceSessions {
    pub(crate) fn load(model_path: &str, use_accelerator: bool, label: &'static str) -> MediaResult<Self> {
        let path = Path::new(model_path);
        if !path.exists() {
            return Err(MediaError::model_not_found(model_path));
        }

        let model_bytes = std::fs::read(path).map_err(|e| {
            MediaError::model_load_failed(format!("Failed to read model file {}: {}", model_path, e))
        })?;

        let cpu = build_session(&model_bytes, ExecutionDevice::Cpu)?;

        let accelerator = if use_accelerator {
            match build_session(&model_bytes, ExecutionDevice::Accelerator) {
                Ok(session) => {
                    info!(model = label, "Using accelerated execution provider");
                    Some(Mutex::new(session))
                }
                Err(e) => {
                    warn!(model = label, error = %e, "Accelerator unavailable, running on CPU only");
                    None
                }
            }
        } else {
            None
        };

        info!(
            model = label,
            model_path = %model_path,
            accelerator = accelerator.is_some(),
            "Model loaded"
        );

        Ok(Self {
            cpu: Mutex::new(cpu),
            accelerator,
        })
    }

    pub(crate) fn has_accelerator(&self) -> bool {
        self.accelerator.is_some()
    }

    /// Run `f` with exclusive access to the session for `device`.
    ///
    /// Requests for an accelerator that failed to load run on CPU.
    pub(crate) fn with_session<T>(
        &self,
        device: ExecutionDevice,
        f: impl FnOnce(&mut Session) -> MediaResult<T>,
    ) -> MediaResult<T> {
        let slot = match (device, &self.accelerator) {
            (ExecutionDevice::Accelerator, Some(accelerated)) => accelerated,
            _ => &self.cpu,
        };

        let mut session = slot
            .lock()
            .map_err(|_| MediaError::internal("Session lock poisoned"))?;

        f(&mut session)
    }
}

/// Map an inference error, separating device exhaustion from other failures.
pub(crate) fn classify_run_error(
    err: impl std::fmt::Display,
    otherwise: fn(String) -> MediaError,
) -> MediaError {
    let message = err.to_string();
    if is_out_of_memory_message(&message) {
        MediaError::resource_exhausted(message)
    } else {
        otherwise(message)
    }
}

fn build_session(model_bytes: &[u8], device: ExecutionDevice) -> MediaResult<Session> {
    let builder = Session::builder()
        .map_err(|e| MediaError::model_load_failed(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::model_load_failed(format!("Failed to set optimization level: {}", e)))?;

    match device {
        ExecutionDevice::Cpu => builder
            .commit_from_memory(model_bytes)
            .map_err(|e| MediaError::model_load_failed(format!("Failed to load ONNX model: {}", e))),
        ExecutionDevice::Accelerator => build_accelerated(builder, model_bytes),
    }
}

#[cfg(all(target_os = "linux", feature = "cuda"))]
fn build_accelerated(builder: SessionBuilder, model_bytes: &[u8]) -> MediaResult<Session> {
    use ort::execution_providers::CUDAExecutionProvider;

    builder
        .with_execution_providers([CUDAExecutionProvider::default().build()])
        .map_err(|e| MediaError::model_load_failed(format!("Failed to register CUDA provider: {}", e)))?
        .commit_from_memory(model_bytes)
        .map_err(|e| MediaError::model_load_failed(format!("Failed to load ONNX model on CUDA: {}", e)))
}

#[cfg(not(all(target_os = "linux", feature = "cuda")))]
fn build_accelerated(_builder: SessionBuilder, _model_bytes: &[u8]) -> MediaResult<Session> {
    Err(MediaError::model_load_failed(
        "built without an accelerated execution provider (enable the `cuda` feature)",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_reported() {
        let err = DeviceSessions::load("/nonexistent/model.onnx", false, "test")
            .err()
            .expect("load should fail");
        assert!(matches!(err, MediaError::ModelNotFound(_)));
    }

    #[test]
    fn test_classify_run_error() {
        let oom = classify_run_error("CUDA error: out of memory", MediaError::DetectionFailed);
        assert!(oom.is_resource_exhausted());

        let other = classify_run_error("shape mismatch", MediaError::InferenceFailed);
        assert!(matches!(other, MediaError::InferenceFailed(_)));
    }
}
