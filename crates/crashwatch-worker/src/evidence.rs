//! Accident evidence selection and storage.
//!
//! [`plan_evidence`] decides which frames to keep; [`EvidenceExtractor`]
//! renders them and hands them to an [`EvidenceStore`].

use std::sync::Arc;

use crashwatch_media::{Annotator, Frame};
use crashwatch_models::{Detection, EventRange, ResultId};
use crashwatch_storage::{EvidenceFrame, EvidenceStore};
use tracing::{debug, info, warn};

use crate::aggregator::group_consecutive;
use crate::error::PipelineResult;

/// Frames used when the aggregator found no event range.
pub const MAX_FALLBACK_FRAMES: usize = 10;

/// Offsets around the peak frame that are saved as stills.
const PEAK_RADIUS: usize = 2;

/// Which frames to store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvidencePlan {
    /// Event ranges, or ranges synthesized from the top frames
    pub accident_ranges: Vec<EventRange>,
    /// Union of the ranges, ascending
    pub accident_indices: Vec<usize>,
    /// Middle accident frame; the only annotated still
    pub peak_index: Option<usize>,
    /// Up to five frames centered on the peak
    pub selected: Vec<usize>,
}

impl EvidencePlan {
    pub fn is_empty(&self) -> bool {
        self.accident_indices.is_empty()
    }
}

/// Pick accident frames from event ranges, falling back to the highest
/// confidences when there are none. Indices at or past `frame_count` are dropped.
pub fn plan_evidence(event_frames: &[EventRange], confidences: &[f64], frame_count: usize) -> EvidencePlan {
    let accident_ranges = if event_frames.is_empty() {
        fallback_ranges(confidences, frame_count)
    } else {
        event_frames.to_vec()
    };

    let mut accident_indices: Vec<usize> = accident_ranges
        .iter()
        .flat_map(EventRange::indices)
        .filter(|&i| i < frame_count)
        .collect();
    accident_indices.sort_unstable();
    accident_indices.dedup();

    let Some(&peak) = accident_indices.get(accident_indices.len() / 2) else {
        return EvidencePlan::default();
    };

    let selected = (peak.saturating_sub(PEAK_RADIUS)..=peak + PEAK_RADIUS)
        .filter(|&i| i < frame_count)
        .collect();

    EvidencePlan {
        accident_ranges,
        accident_indices,
        peak_index: Some(peak),
        selected,
    }
}

/// Top frames by confidence (ties to the lower index), grouped into runs.
fn fallback_ranges(confidences: &[f64], frame_count: usize) -> Vec<EventRange> {
    let usable = confidences.len().min(frame_count);

    let mut ranked: Vec<usize> = (0..usable).collect();
    ranked.sort_by(|&a, &b| confidences[b].total_cmp(&confidences[a]).then(a.cmp(&b)));
    ranked.truncate(MAX_FALLBACK_FRAMES);
    ranked.sort_unstable();

    group_consecutive(&ranked)
}

/// Stored evidence for one analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvidenceArtifacts {
    pub selected_frames: Vec<usize>,
    pub frame_urls: Vec<String>,
    pub clip_url: Option<String>,
    pub accident_frame_count: usize,
}

pub struct EvidenceExtractor {
    store: Arc<dyn EvidenceStore>,
    clip_fps: f64,
    annotator: Annotator,
}

impl EvidenceExtractor {
    pub fn new(store: Arc<dyn EvidenceStore>, clip_fps: f64) -> Self {
        Self {
            store,
            clip_fps,
            annotator: Annotator::new(),
        }
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    /// Store the planned stills and a clip of every accident frame.
    ///
    /// Still failures are fatal. A clip that cannot be written is reported as absent.
    pub async fn extract(
        &self,
        result_id: &ResultId,
        frames: &[Frame],
        detections: &[Vec<Detection>],
        plan: &EvidencePlan,
    ) -> PipelineResult<EvidenceArtifacts> {
        if plan.is_empty() {
            return Ok(EvidenceArtifacts::default());
        }

        let stills: Vec<EvidenceFrame> = plan
            .selected
            .iter()
            .filter_map(|&index| frames.get(index))
            .map(|frame| {
                let mut image = frame.image.clone();
                let annotated = plan.peak_index == Some(frame.index);
                if annotated {
                    let boxes = detections
                        .get(frame.index)
                        .map(|d| self.annotator.annotate(&mut image, d))
                        .unwrap_or(0);
                    debug!(frame = frame.index, boxes, "Annotated peak frame");
                }
                EvidenceFrame {
                    index: frame.index,
                    image,
                    annotated,
                }
            })
            .collect();

        let frame_urls = self.store.save_frames(result_id, &stills).await?;

        let clip_frames: Vec<_> = plan
            .accident_indices
            .iter()
            .filter_map(|&index| frames.get(index))
            .map(|frame| &frame.image)
            .collect();
        let clip_url = match self.store.write_clip(result_id, &clip_frames, self.clip_fps).await {
            Ok(url) => url,
            Err(e) => {
                warn!(result_id = %result_id, error = %e, "Failed to write accident clip");
                None
            }
        };

        info!(
            result_id = %result_id,
            store = self.store.name(),
            stills = frame_urls.len(),
            clip_frames = clip_frames.len(),
            clip = clip_url.is_some(),
            "Evidence extracted"
        );

        Ok(EvidenceArtifacts {
            selected_frames: stills.iter().map(|f| f.index).collect(),
            frame_urls,
            clip_url,
            accident_frame_count: plan.accident_indices.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crashwatch_models::BoundingBox;
    use crashwatch_storage::{MemoryEvidenceStore, StorageError, StorageResult, StoredArtifact};
    use image::RgbImage;

    fn frames(count: usize) -> Vec<Frame> {
        (0..count)
            .map(|i| Frame::new(i, i as u64 * 3, RgbImage::new(32, 24)))
            .collect()
    }

    #[test]
    fn test_plan_from_event() {
        let plan = plan_evidence(&[EventRange::new(40, 60)], &[], 61);

        assert_eq!(plan.accident_indices.len(), 21);
        assert_eq!(plan.peak_index, Some(50));
        assert_eq!(plan.selected, vec![48, 49, 50, 51, 52]);
    }

    #[test]
    fn test_plan_unions_ranges() {
        let plan = plan_evidence(&[EventRange::new(0, 1), EventRange::new(4, 5)], &[], 6);
        assert_eq!(plan.accident_indices, vec![0, 1, 4, 5]);
        // sorted[4 / 2]
        assert_eq!(plan.peak_index, Some(4));
        assert_eq!(plan.selected, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_selection_clipped_at_start() {
        let plan = plan_evidence(&[EventRange::new(0, 2)], &[], 10);
        assert_eq!(plan.peak_index, Some(1));
        assert_eq!(plan.selected, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_fallback_uses_top_confidences() {
        let mut confidences = vec![0.1; 30];
        for (i, c) in [(3, 0.6), (4, 0.65), (5, 0.62), (20, 0.55)] {
            confidences[i] = c;
        }

        let plan = plan_evidence(&[], &confidences, 30);

        // Four raised frames plus the six lowest-index ties.
        assert_eq!(plan.accident_indices, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 20]);
        assert_eq!(
            plan.accident_ranges,
            vec![EventRange::new(0, 8), EventRange::new(20, 20)]
        );
        assert_eq!(plan.peak_index, Some(5));
    }

    #[test]
    fn test_fallback_ignores_padding_positions() {
        let mut confidences = vec![0.0; 150];
        confidences[140] = 0.99;

        let plan = plan_evidence(&[], &confidences, 12);
        assert!(plan.accident_indices.iter().all(|&i| i < 12));
        assert_eq!(plan.accident_indices.len(), 10);
    }

    #[test]
    fn test_empty_plan() {
        assert!(plan_evidence(&[], &[], 0).is_empty());
    }

    #[tokio::test]
    async fn test_extract_annotates_only_the_peak() {
        let store = Arc::new(MemoryEvidenceStore::new());
        let extractor = EvidenceExtractor::new(store.clone(), 10.0);
        let frames = frames(61);

        let car = Detection::new(BoundingBox::new(2.0, 2.0, 20.0, 20.0), 0.9, 2, "car");
        let detections = vec![vec![car]; 61];
        let plan = plan_evidence(&[EventRange::new(40, 60)], &[], 61);
        let id = ResultId::from("result-v1");

        let artifacts = extractor.extract(&id, &frames, &detections, &plan).await.unwrap();

        assert_eq!(artifacts.selected_frames, vec![48, 49, 50, 51, 52]);
        assert_eq!(artifacts.frame_urls.len(), 5);
        assert_eq!(artifacts.accident_frame_count, 21);
        assert_eq!(artifacts.clip_url.as_deref(), Some("memory://result-v1/accident.mp4"));

        for (index, url) in artifacts.selected_frames.iter().zip(&artifacts.frame_urls) {
            match store.get(url) {
                Some(StoredArtifact::Frame { annotated, .. }) => assert_eq!(annotated, *index == 50),
                other => panic!("unexpected artifact {:?}", other),
            }
        }

        assert!(matches!(
            store.get("memory://result-v1/accident.mp4"),
            Some(StoredArtifact::Clip { frame_count: 21, .. })
        ));
    }

    /// Keeps stills in memory but fails every clip write.
    struct ClipFailingStore {
        inner: MemoryEvidenceStore,
    }

    #[async_trait::async_trait]
    impl EvidenceStore for ClipFailingStore {
        async fn save_frames(&self, result_id: &ResultId, frames: &[EvidenceFrame]) -> StorageResult<Vec<String>> {
            self.inner.save_frames(result_id, frames).await
        }

        async fn write_clip(&self, _result_id: &ResultId, _frames: &[&RgbImage], _fps: f64) -> StorageResult<Option<String>> {
            Err(StorageError::write_failed("encoder crashed"))
        }

        fn name(&self) -> &'static str {
            "clip-failing"
        }
    }

    #[tokio::test]
    async fn test_clip_failure_keeps_stills() {
        let store = Arc::new(ClipFailingStore {
            inner: MemoryEvidenceStore::new(),
        });
        let extractor = EvidenceExtractor::new(store.clone(), 10.0);
        let plan = plan_evidence(&[EventRange::new(40, 60)], &[], 61);

        let artifacts = tokio_test::assert_ok!(
            extractor
                .extract(&ResultId::from("result-v3"), &frames(61), &vec![Vec::<Detection>::new(); 61], &plan)
                .await
        );

        assert_eq!(artifacts.frame_urls.len(), 5);
        assert_eq!(artifacts.clip_url, None);
        assert_eq!(artifacts.accident_frame_count, 21);
        assert_eq!(store.inner.len(), 5);
    }

    #[tokio::test]
    async fn test_extract_empty_plan_stores_nothing() {
        let store = Arc::new(MemoryEvidenceStore::new());
        let extractor = EvidenceExtractor::new(store.clone(), 10.0);

        let artifacts = extractor
            .extract(&ResultId::from("result-v2"), &[], &[], &EvidencePlan::default())
            .await
            .unwrap();

        assert_eq!(artifacts, EvidenceArtifacts::default());
        assert!(store.is_empty());
    }
}
