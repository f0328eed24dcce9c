//! Classification metrics over labelled analyses.

use serde::Serialize;

/// Confusion matrix counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }
}

/// Report produced by [`EvaluationMetrics::report`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub confusion_matrix: ConfusionMatrix,
    pub avg_inference_time: f64,
    pub samples: usize,
}

/// Accumulates (ground truth, prediction, inference time) samples.
#[derive(Debug, Clone, Default)]
pub struct EvaluationMetrics {
    matrix: ConfusionMatrix,
    total_inference_time: f64,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl EvaluationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, actual: bool, predicted: bool, inference_time: f64) {
        match (actual, predicted) {
            (true, true) => self.matrix.true_positives += 1,
            (false, true) => self.matrix.false_positives += 1,
            (false, false) => self.matrix.true_negatives += 1,
            (true, false) => self.matrix.false_negatives += 1,
        }
        self.total_inference_time += inference_time;
    }

    pub fn samples(&self) -> usize {
        self.matrix.total()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn report(&self) -> EvaluationReport {
        let m = self.matrix;
        let precision = ratio(m.true_positives, m.true_positives + m.false_positives);
        let recall = ratio(m.true_positives, m.true_positives + m.false_negatives);
        let f1_score = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };

        let samples = m.total();
        EvaluationReport {
            accuracy: ratio(m.true_positives + m.true_negatives, samples),
            precision,
            recall,
            f1_score,
            confusion_matrix: m,
            avg_inference_time: if samples == 0 {
                0.0
            } else {
                self.total_inference_time / samples as f64
            },
            samples,
        }
    }
}
