//! Object detection models.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Class names treated as vehicles by the pipeline (COCO ids 2, 3, 5, 7).
pub const VEHICLE_CLASSES: &[&str] = &["car", "motorcycle", "bus", "truck"];

/// Returns true if the class name belongs to the vehicle set.
pub fn is_vehicle_class(class_name: &str) -> bool {
    VEHICLE_CLASSES.contains(&class_name)
}

/// Axis-aligned bounding box in pixel coordinates (x1, y1, x2, y2).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Coordinates in xyxy order.
    pub fn coords(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// A single object observation in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1]
    pub confidence: f32,
    pub class_id: usize,
    pub class_name: String,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32, class_id: usize, class_name: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
            class_name: class_name.into(),
        }
    }

    pub fn is_vehicle(&self) -> bool {
        is_vehicle_class(&self.class_name)
    }
}

/// Total number of vehicle-class detections across all frames.
pub fn count_vehicles(per_frame: &[Vec<Detection>]) -> usize {
    per_frame
        .iter()
        .map(|detections| detections.iter().filter(|d| d.is_vehicle()).count())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_name: &str) -> Detection {
        Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9, 0, class_name)
    }

    #[test]
    fn test_vehicle_classes() {
        assert!(is_vehicle_class("car"));
        assert!(is_vehicle_class("truck"));
        assert!(!is_vehicle_class("person"));
        assert!(!is_vehicle_class("bicycle"));
    }

    #[test]
    fn test_count_vehicles_ignores_other_classes() {
        let frames = vec![
            vec![det("car"), det("person")],
            vec![],
            vec![det("bus"), det("motorcycle"), det("dog")],
        ];
        assert_eq!(count_vehicles(&frames), 3);
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        let iou = a.iou(&b);
        // 25 / (100 + 100 - 25)
        assert!((iou - 25.0 / 175.0).abs() < 1e-6);

        let far = BoundingBox::new(100.0, 100.0, 110.0, 110.0);
        assert_eq!(a.iou(&far), 0.0);
    }
}
