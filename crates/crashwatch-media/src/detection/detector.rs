//! Vehicle detection using a YOLOv8 ONNX model.

use crashwatch_models::{BoundingBox, Detection};
use image::RgbImage;
use ndarray::Array;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, warn};

use super::session::{classify_run_error, DeviceSessions};
use crate::device::ExecutionDevice;
use crate::error::{MediaError, MediaResult};
use crate::frames::Frame;

/// Per-frame object detection capability.
///
/// Failures are returned, never replaced by an empty detection list.
pub trait SpatialDetector: Send + Sync {
    /// Detect objects at or above `confidence_threshold`, boxes in frame pixels.
    fn detect(
        &self,
        frame: &Frame,
        confidence_threshold: f32,
        device: ExecutionDevice,
    ) -> MediaResult<Vec<Detection>>;

    /// Free device memory cached between calls, if the backend keeps any.
    fn release_device_memory(&self) {}

    fn name(&self) -> &'static str;
}

/// COCO class names (80 classes).
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck",
    "boat", "traffic light", "fire hydrant", "stop sign", "parking meter", "bench",
    "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra",
    "giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee",
    "skis", "snowboard", "sports ball", "kite", "baseball bat", "baseball glove",
    "skateboard", "surfboard", "tennis racket", "bottle", "wine glass", "cup",
    "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

/// YOLOv8 output layout: 4 box values + 80 class scores per candidate.
const NUM_CLASSES: usize = 80;
const NUM_FEATURES: usize = 4 + NUM_CLASSES;
const NUM_CANDIDATES: usize = 8400;

/// Configuration for the ONNX vehicle detector.
#[derive(Debug, Clone)]
pub struct VehicleDetectorConfig {
    /// Path to ONNX model file
    pub model_path: String,
    /// IoU threshold for NMS
    pub nms_threshold: f32,
    /// Input image size (model expects square input)
    pub input_size: u32,
    /// Also load an accelerated session
    pub use_accelerator: bool,
}

impl Default for VehicleDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov8n.onnx".to_string(),
            nms_threshold: 0.45,
            input_size: 640,
            use_accelerator: true,
        }
    }
}

/// Object detector using a YOLOv8 ONNX model with xyxy pixel output.
pub struct OnnxVehicleDetector {
    sessions: DeviceSessions,
    config: VehicleDetectorConfig,
}

impl OnnxVehicleDetector {
    /// Load the model. Fails with `ModelNotFound` or `ModelLoadFailed`.
    pub fn new(config: VehicleDetectorConfig) -> MediaResult<Self> {
        let sessions = DeviceSessions::load(&config.model_path, config.use_accelerator, "yolov8")?;
        Ok(Self { sessions, config })
    }

    pub fn config(&self) -> &VehicleDetectorConfig {
        &self.config
    }

    pub fn has_accelerator(&self) -> bool {
        self.sessions.has_accelerator()
    }

    /// Resize to the model input, normalize to [0, 1], NCHW layout.
    fn preprocess(&self, image: &RgbImage) -> MediaResult<Value> {
        let size = self.config.input_size;
        let resized = image::imageops::resize(image, size, size, image::imageops::FilterType::Triangle);
        let (w, h) = (size as usize, size as usize);

        let mut chw_data: Vec<f32> = Vec::with_capacity(3 * h * w);
        for c in 0..3 {
            for pixel in resized.pixels() {
                chw_data.push(pixel[c] as f32 / 255.0);
            }
        }

        let shape = vec![1usize, 3, h, w];
        Tensor::from_array((shape, chw_data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::internal(format!("Failed to create tensor: {}", e)))
    }

    fn run_inference(session: &mut Session, input: Value) -> MediaResult<Vec<f32>> {
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| classify_run_error(e, MediaError::DetectionFailed))?;

        // YOLOv8 output is [1, 84, 8400]
        let output = outputs
            .get("output0")
            .ok_or_else(|| MediaError::detection_failed("Missing output0 tensor"))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::detection_failed(format!("Failed to extract tensor: {}", e)))?;

        Ok(tensor.1.iter().copied().collect())
    }
}

impl SpatialDetector for OnnxVehicleDetector {
    fn detect(
        &self,
        frame: &Frame,
        confidence_threshold: f32,
        device: ExecutionDevice,
    ) -> MediaResult<Vec<Detection>> {
        if frame.is_empty() {
            warn!(frame = frame.index, "Skipping detection on empty frame");
            return Ok(Vec::new());
        }

        let input = self.preprocess(&frame.image)?;
        let outputs = self
            .sessions
            .with_session(device, |session| Self::run_inference(session, input))?;

        let candidates = decode_yolo_output(
            &outputs,
            frame.width(),
            frame.height(),
            self.config.input_size,
            confidence_threshold,
        )?;
        let detections = non_maximum_suppression(candidates, self.config.nms_threshold);

        debug!(
            frame = frame.index,
            device = %device,
            count = detections.len(),
            "Object detection completed"
        );

        Ok(detections)
    }

    fn name(&self) -> &'static str {
        "yolov8-onnx"
    }
}

/// Parse YOLOv8 `[1, 84, 8400]` output into pixel-space xyxy detections.
pub fn decode_yolo_output(
    outputs: &[f32],
    orig_width: u32,
    orig_height: u32,
    input_size: u32,
    confidence_threshold: f32,
) -> MediaResult<Vec<Detection>> {
    if outputs.len() != NUM_FEATURES * NUM_CANDIDATES {
        return Err(MediaError::detection_failed(format!(
            "Unexpected output size: expected {}, got {}",
            NUM_FEATURES * NUM_CANDIDATES,
            outputs.len()
        )));
    }

    let output_array = Array::from_shape_vec((NUM_FEATURES, NUM_CANDIDATES), outputs.to_vec())
        .map_err(|e| MediaError::detection_failed(format!("Failed to reshape output: {}", e)))?;
    let transposed = output_array.t(); // [8400, 84]

    let scale_w = orig_width as f32 / input_size as f32;
    let scale_h = orig_height as f32 / input_size as f32;
    let (max_x, max_y) = (orig_width as f32, orig_height as f32);

    let mut candidates = Vec::new();
    for i in 0..NUM_CANDIDATES {
        let mut best_class = 0;
        let mut best_score = 0.0f32;
        for c in 0..NUM_CLASSES {
            let score = transposed[[i, 4 + c]];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_score < confidence_threshold {
            continue;
        }

        let (cx, cy) = (transposed[[i, 0]], transposed[[i, 1]]);
        let (w, h) = (transposed[[i, 2]], transposed[[i, 3]]);

        let bbox = BoundingBox::new(
            ((cx - w / 2.0) * scale_w).clamp(0.0, max_x),
            ((cy - h / 2.0) * scale_h).clamp(0.0, max_y),
            ((cx + w / 2.0) * scale_w).clamp(0.0, max_x),
            ((cy + h / 2.0) * scale_h).clamp(0.0, max_y),
        );

        candidates.push(Detection::new(
            bbox,
            best_score,
            best_class,
            COCO_CLASSES[best_class],
        ));
    }

    Ok(candidates)
}

/// Class-wise non-maximum suppression, highest confidence first.
pub fn non_maximum_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in detections {
        let overlaps = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && kept.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !overlaps {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, confidence: f32, class_id: usize) -> Detection {
        Detection::new(
            BoundingBox::new(x1, 0.0, x1 + 100.0, 100.0),
            confidence,
            class_id,
            COCO_CLASSES[class_id],
        )
    }

    #[test]
    fn test_coco_classes() {
        assert_eq!(COCO_CLASSES.len(), NUM_CLASSES);
        assert_eq!(COCO_CLASSES[2], "car");
        assert_eq!(COCO_CLASSES[3], "motorcycle");
        assert_eq!(COCO_CLASSES[5], "bus");
        assert_eq!(COCO_CLASSES[7], "truck");
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap() {
        let kept = non_maximum_suppression(
            vec![det(0.0, 0.6, 2), det(5.0, 0.9, 2), det(5.0, 0.8, 7), det(500.0, 0.5, 2)],
            0.45,
        );

        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.9);
        // Truck overlapping a car survives: suppression is per class.
        assert!(kept.iter().any(|d| d.class_name == "truck"));
        assert!(kept.iter().all(|d| d.confidence != 0.6));
    }

    #[test]
    fn test_decode_yolo_output() {
        let mut outputs = vec![0.0f32; NUM_FEATURES * NUM_CANDIDATES];
        let at = |feature: usize, candidate: usize| feature * NUM_CANDIDATES + candidate;

        // One car centered at (320, 320), 64x32 in model space.
        outputs[at(0, 10)] = 320.0;
        outputs[at(1, 10)] = 320.0;
        outputs[at(2, 10)] = 64.0;
        outputs[at(3, 10)] = 32.0;
        outputs[at(4 + 2, 10)] = 0.8;

        // Below threshold.
        outputs[at(4 + 7, 11)] = 0.1;

        let detections = decode_yolo_output(&outputs, 1280, 640, 640, 0.25).unwrap();
        assert_eq!(detections.len(), 1);

        let d = &detections[0];
        assert_eq!(d.class_name, "car");
        assert!(d.is_vehicle());
        assert_eq!(d.bbox, BoundingBox::new(576.0, 304.0, 704.0, 336.0));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let err = decode_yolo_output(&[0.0; 10], 640, 640, 640, 0.25).unwrap_err();
        assert!(matches!(err, MediaError::DetectionFailed(_)));
    }
}
