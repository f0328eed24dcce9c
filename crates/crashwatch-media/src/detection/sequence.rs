//! Temporal sequence model: feature sequence to per-position accident probability.

use crashwatch_models::{FeatureSequence, FEATURE_DIM};
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::debug;

use super::session::{classify_run_error, DeviceSessions};
use crate::device::ExecutionDevice;
use crate::error::{MediaError, MediaResult};

/// Default trailing context window.
pub const DEFAULT_CONTEXT_WINDOW: usize = 30;

/// Sequence model capability.
///
/// Returns one probability in [0, 1] per input position; position `i` only
/// depends on feature vectors `0..=i`.
pub trait TemporalSequenceModel: Send + Sync {
    fn predict_sequence(&self, features: &FeatureSequence, device: ExecutionDevice) -> MediaResult<Vec<f32>>;

    /// Free device memory cached between calls, if the backend keeps any.
    fn release_device_memory(&self) {}

    fn name(&self) -> &'static str;
}

/// Build `[len, context, FEATURE_DIM]` trailing windows, left zero-padded.
pub fn trailing_windows(features: &FeatureSequence, context: usize) -> Vec<f32> {
    let vectors = features.as_slice();
    let mut data = Vec::with_capacity(vectors.len() * context * FEATURE_DIM);

    for position in 0..vectors.len() {
        let first = position as isize - context as isize + 1;
        for offset in 0..context {
            let source = first + offset as isize;
            let values = if source >= 0 {
                vectors[source as usize].to_array()
            } else {
                [0.0; FEATURE_DIM]
            };
            data.extend_from_slice(&values);
        }
    }

    data
}

/// Configuration for the ONNX sequence model.
#[derive(Debug, Clone)]
pub struct SequenceModelConfig {
    /// Path to ONNX model file
    pub model_path: String,
    /// Trailing positions fed per prediction
    pub context_window: usize,
    /// Name of the probability output tensor
    pub output_name: String,
    /// Also load an accelerated session
    pub use_accelerator: bool,
}

impl Default for SequenceModelConfig {
    fn default() -> Self {
        Self {
            model_path: "models/accident_lstm.onnx".to_string(),
            context_window: DEFAULT_CONTEXT_WINDOW,
            output_name: "output".to_string(),
            use_accelerator: true,
        }
    }
}

/// Sequence model exported to ONNX, taking `[batch, context, 3]` windows and
/// producing one probability per window.
pub struct OnnxSequenceModel {
    sessions: DeviceSessions,
    config: SequenceModelConfig,
}

impl OnnxSequenceModel {
    pub fn new(config: SequenceModelConfig) -> MediaResult<Self> {
        if config.context_window == 0 {
            return Err(MediaError::model_load_failed("context window must be positive"));
        }
        let sessions = DeviceSessions::load(&config.model_path, config.use_accelerator, "sequence")?;
        Ok(Self { sessions, config })
    }

    pub fn config(&self) -> &SequenceModelConfig {
        &self.config
    }

    fn run_inference(&self, session: &mut Session, input: Value) -> MediaResult<Vec<f32>> {
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| classify_run_error(e, MediaError::InferenceFailed))?;

        let output = outputs.get(self.config.output_name.as_str()).ok_or_else(|| {
            MediaError::inference_failed(format!("Missing {} tensor", self.config.output_name))
        })?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::inference_failed(format!("Failed to extract tensor: {}", e)))?;

        Ok(tensor.1.iter().copied().collect())
    }
}

impl TemporalSequenceModel for OnnxSequenceModel {
    fn predict_sequence(&self, features: &FeatureSequence, device: ExecutionDevice) -> MediaResult<Vec<f32>> {
        let length = features.len();
        if length == 0 {
            return Ok(Vec::new());
        }

        let context = self.config.context_window;
        let shape = vec![length, context, FEATURE_DIM];
        let input = Tensor::from_array((shape, trailing_windows(features, context).into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::internal(format!("Failed to create tensor: {}", e)))?;

        let raw = self
            .sessions
            .with_session(device, |session| self.run_inference(session, input))?;

        if raw.len() != length {
            return Err(MediaError::inference_failed(format!(
                "Expected {} probabilities, got {}",
                length,
                raw.len()
            )));
        }
        if let Some(position) = raw.iter().position(|p| !p.is_finite()) {
            return Err(MediaError::inference_failed(format!(
                "Non-finite probability at position {}",
                position
            )));
        }

        debug!(length, context, device = %device, "Sequence inference completed");

        Ok(raw.into_iter().map(|p| p.clamp(0.0, 1.0)).collect())
    }

    fn name(&self) -> &'static str {
        "sequence-onnx"
    }
}
