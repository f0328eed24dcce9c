//! Per-frame detections to a fixed-length feature sequence.

use crashwatch_models::{Detection, FeatureSequence, FeatureVector, DEFAULT_SEQUENCE_LENGTH};

const COUNT_SCALE: f64 = 10.0;
const COUNT_CAP: f64 = 2.0;
const VARIANCE_SCALE: f64 = 100_000.0;
const VARIANCE_CAP: f64 = 5.0;

/// Feature vector for one frame. Only vehicle-class detections contribute.
pub fn frame_features(detections: &[Detection]) -> FeatureVector {
    let vehicles: Vec<&Detection> = detections.iter().filter(|d| d.is_vehicle()).collect();
    if vehicles.is_empty() {
        return FeatureVector::ZERO;
    }

    let count = vehicles.len() as f64;
    let mean_confidence = vehicles.iter().map(|d| d.confidence as f64).sum::<f64>() / count;

    // Population variance over every coordinate of every box.
    let coords: Vec<f64> = vehicles
        .iter()
        .flat_map(|d| d.bbox.coords())
        .map(f64::from)
        .collect();
    let coord_mean = coords.iter().sum::<f64>() / coords.len() as f64;
    let variance = coords.iter().map(|c| (c - coord_mean).powi(2)).sum::<f64>() / coords.len() as f64;

    FeatureVector::new(
        (count / COUNT_SCALE).min(COUNT_CAP) as f32,
        mean_confidence as f32,
        (variance / VARIANCE_SCALE).min(VARIANCE_CAP) as f32,
    )
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureVectorizer {
    sequence_length: usize,
}

impl Default for FeatureVectorizer {
    fn default() -> Self {
        Self::new(DEFAULT_SEQUENCE_LENGTH)
    }
}

impl FeatureVectorizer {
    pub fn new(sequence_length: usize) -> Self {
        Self { sequence_length }
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    /// One vector per frame, then truncated or zero-padded to the sequence length.
    pub fn vectorize(&self, per_frame: &[Vec<Detection>]) -> FeatureSequence {
        let vectors = per_frame
            .iter()
            .take(self.sequence_length)
            .map(|detections| frame_features(detections))
            .collect();

        FeatureSequence::with_length(vectors, self.sequence_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crashwatch_models::BoundingBox;

    fn car(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Detection {
        Detection::new(BoundingBox::new(x1, y1, x2, y2), confidence, 2, "car")
    }

    #[test]
    fn test_no_vehicles_is_zero() {
        assert!(frame_features(&[]).is_zero());

        let person = Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9, 0, "person");
        assert!(frame_features(&[person]).is_zero());
    }

    #[test]
    fn test_single_vehicle() {
        let features = frame_features(&[car(0.0, 0.0, 100.0, 100.0, 0.8)]);

        assert!((features.vehicle_count - 0.1).abs() < 1e-6);
        assert!((features.mean_confidence - 0.8).abs() < 1e-6);
        // coords [0, 0, 100, 100]: mean 50, variance 2500
        assert!((features.bbox_variance - 0.025).abs() < 1e-6);
    }

    #[test]
    fn test_ignores_non_vehicles() {
        let person = Detection::new(BoundingBox::new(500.0, 500.0, 900.0, 900.0), 0.1, 0, "person");
        let features = frame_features(&[car(0.0, 0.0, 100.0, 100.0, 0.6), person]);
        assert!((features.vehicle_count - 0.1).abs() < 1e-6);
        assert!((features.mean_confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_caps() {
        let crowd: Vec<Detection> = (0..30)
            .map(|i| {
                let x = (i * 2000) as f32;
                car(x, 0.0, x + 50.0, 50.0, 0.5)
            })
            .collect();
        let features = frame_features(&crowd);
        assert_eq!(features.vehicle_count, 2.0);
        assert_eq!(features.bbox_variance, 5.0);
    }

    #[test]
    fn test_sequence_length_is_fixed() {
        let vectorizer = FeatureVectorizer::default();
        let frame = vec![car(0.0, 0.0, 10.0, 10.0, 0.9)];

        for frames in [1usize, 37, 149, 150, 151, 400] {
            let sequence = vectorizer.vectorize(&vec![frame.clone(); frames]);
            assert_eq!(sequence.len(), 150);
        }
    }

    #[test]
    fn test_padding_is_at_the_tail() {
        let vectorizer = FeatureVectorizer::new(5);
        let frame = vec![car(0.0, 0.0, 10.0, 10.0, 0.9)];

        let sequence = vectorizer.vectorize(&[frame.clone(), frame]);
        let vectors = sequence.as_slice();
        assert!(!vectors[0].is_zero());
        assert!(!vectors[1].is_zero());
        assert!(vectors[2..].iter().all(FeatureVector::is_zero));
    }
}
