//! Deterministic detector and sequence model for tests and dry runs.

use std::sync::atomic::{AtomicUsize, Ordering};

use crashwatch_models::{Detection, FeatureSequence};

use super::detector::SpatialDetector;
use super::sequence::TemporalSequenceModel;
use crate::device::ExecutionDevice;
use crate::error::{MediaError, MediaResult};
use crate::frames::Frame;

/// Returns fixed detections keyed by sampled frame index.
#[derive(Debug, Default)]
pub struct ScriptedDetector {
    per_frame: Vec<Vec<Detection>>,
    exhaust_accelerator: bool,
    failure: Option<String>,
    accelerator_calls: AtomicUsize,
    cpu_calls: AtomicUsize,
    releases: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(per_frame: Vec<Vec<Detection>>) -> Self {
        Self {
            per_frame,
            ..Self::default()
        }
    }

    /// Same detections for each of the first `frame_count` frames.
    pub fn uniform(frame_count: usize, detections: Vec<Detection>) -> Self {
        Self::new(vec![detections; frame_count])
    }

    /// Every call on the accelerator fails with device exhaustion.
    pub fn exhausting_accelerator(mut self) -> Self {
        self.exhaust_accelerator = true;
        self
    }

    /// Every call fails with a detection error.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn calls_on(&self, device: ExecutionDevice) -> usize {
        match device {
            ExecutionDevice::Accelerator => self.accelerator_calls.load(Ordering::SeqCst),
            ExecutionDevice::Cpu => self.cpu_calls.load(Ordering::SeqCst),
        }
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl SpatialDetector for ScriptedDetector {
    fn detect(
        &self,
        frame: &Frame,
        confidence_threshold: f32,
        device: ExecutionDevice,
    ) -> MediaResult<Vec<Detection>> {
        match device {
            ExecutionDevice::Accelerator => self.accelerator_calls.fetch_add(1, Ordering::SeqCst),
            ExecutionDevice::Cpu => self.cpu_calls.fetch_add(1, Ordering::SeqCst),
        };

        if let Some(message) = &self.failure {
            return Err(MediaError::detection_failed(message.clone()));
        }
        if device.is_accelerator() && self.exhaust_accelerator {
            return Err(MediaError::resource_exhausted("scripted accelerator out of memory"));
        }

        Ok(self
            .per_frame
            .get(frame.index)
            .map(|detections| {
                detections
                    .iter()
                    .filter(|d| d.confidence >= confidence_threshold)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn release_device_memory(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "scripted-detector"
    }
}

/// Returns a fixed confidence sequence, resized to the input length.
#[derive(Debug, Default)]
pub struct ScriptedSequenceModel {
    confidences: Vec<f32>,
    exhaust_accelerator: bool,
    exhaust_cpu: bool,
    releases: AtomicUsize,
}

impl ScriptedSequenceModel {
    pub fn new(confidences: Vec<f32>) -> Self {
        Self {
            confidences,
            ..Self::default()
        }
    }

    /// `value` for every position.
    pub fn constant(value: f32, length: usize) -> Self {
        Self::new(vec![value; length])
    }

    pub fn exhausting_accelerator(mut self) -> Self {
        self.exhaust_accelerator = true;
        self
    }

    /// Fail on the CPU path too, making exhaustion unrecoverable.
    pub fn exhausting_everywhere(mut self) -> Self {
        self.exhaust_accelerator = true;
        self.exhaust_cpu = true;
        self
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl TemporalSequenceModel for ScriptedSequenceModel {
    fn predict_sequence(&self, features: &FeatureSequence, device: ExecutionDevice) -> MediaResult<Vec<f32>> {
        let exhausted = match device {
            ExecutionDevice::Accelerator => self.exhaust_accelerator,
            ExecutionDevice::Cpu => self.exhaust_cpu,
        };
        if exhausted {
            return Err(MediaError::resource_exhausted(format!(
                "scripted {} out of memory",
                device
            )));
        }

        let mut output = self.confidences.clone();
        output.resize(features.len(), 0.0);
        Ok(output)
    }

    fn release_device_memory(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "scripted-sequence"
    }
}
