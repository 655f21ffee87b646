use std::time::{Duration, Instant};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Classification, Detection, ObjectObservation};
use crate::error::PipelineError;
use crate::frame::Frame;

/// Post-processing knobs applied to raw backend output.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineOptions {
    /// Detections below this confidence are dropped. 0.0 keeps everything.
    pub confidence_threshold: f32,
    /// Keep only the best label of each detected object.
    pub top_label_only: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.0,
            top_label_only: true,
        }
    }
}

/// Runs a detector backend and turns its observations into detections.
///
/// Per object, candidate labels are ordered by descending confidence. In
/// top-label mode only the first survives. The confidence threshold is applied
/// after that selection, so an object whose best label falls under the
/// threshold disappears entirely rather than falling back to a weaker label.
pub struct InferenceEngine {
    backend: Box<dyn DetectorBackend>,
    options: EngineOptions,
    frames: u64,
    busy: Duration,
}

impl InferenceEngine {
    /// Warm the backend up. A failing warm-up means the model is unusable.
    pub fn new<B: DetectorBackend + 'static>(
        backend: B,
        options: EngineOptions,
    ) -> Result<Self, PipelineError> {
        Self::from_boxed(Box::new(backend), options)
    }

    pub fn from_boxed(
        mut backend: Box<dyn DetectorBackend>,
        options: EngineOptions,
    ) -> Result<Self, PipelineError> {
        if !(0.0..=1.0).contains(&options.confidence_threshold) {
            return Err(PipelineError::InvalidConfig(format!(
                "confidence threshold {} is outside [0, 1]",
                options.confidence_threshold
            )));
        }
        backend
            .warm_up()
            .map_err(|e| PipelineError::model(backend.name(), format!("{e:#}")))?;
        log::info!(
            "inference engine ready: backend={} threshold={:.2} top_label_only={}",
            backend.name(),
            options.confidence_threshold,
            options.top_label_only
        );
        Ok(Self {
            backend,
            options,
            frames: 0,
            busy: Duration::ZERO,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Average wall time per `infer` call so far.
    pub fn average_latency(&self) -> Duration {
        mean_duration(self.busy, self.frames)
    }

    /// Run inference on one frame. Blocks until the backend answers.
    pub fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, PipelineError> {
        let started = Instant::now();
        let result = self.backend.detect(frame.inference_view());
        self.busy += started.elapsed();
        self.frames += 1;

        let observations = result.map_err(|e| PipelineError::InferenceError {
            pts: frame.pts,
            reason: format!("{e:#}"),
        })?;
        Ok(select_detections(observations, &self.options))
    }
}

fn mean_duration(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(total.as_secs_f64() / count as f64)
}

/// Label selection followed by the threshold post-filter.
///
/// Confidences are clamped into [0, 1]; non-finite ones are dropped.
pub(crate) fn select_detections(
    observations: Vec<ObjectObservation>,
    options: &EngineOptions,
) -> Vec<Detection> {
    let mut detections = Vec::new();
    for observation in observations {
        let mut labels: Vec<Classification> = observation
            .labels
            .into_iter()
            .filter(|c| c.confidence.is_finite())
            .map(|mut c| {
                c.confidence = c.confidence.clamp(0.0, 1.0);
                c
            })
            .collect();
        labels.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        if options.top_label_only {
            labels.truncate(1);
        }
        detections.extend(
            labels
                .into_iter()
                .filter(|c| c.confidence >= options.confidence_threshold)
                .map(|c| Detection {
                    label: c.label,
                    confidence: c.confidence,
                    bbox: observation.bbox,
                }),
        );
    }
    detections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;
    use crate::geometry::NormalizedRect;

    const CENTER: NormalizedRect = NormalizedRect::new(0.25, 0.25, 0.5, 0.5);

    fn observation(labels: &[(&str, f32)]) -> ObjectObservation {
        ObjectObservation::new(
            CENTER,
            labels
                .iter()
                .map(|(l, c)| Classification::new(*l, *c))
                .collect(),
        )
    }

    fn test_frame() -> Frame {
        Frame::new(vec![0u8; 4 * 4 * 3], 4, 4, Duration::from_millis(80)).expect("frame")
    }

    #[test]
    fn threshold_keeps_confident_box_and_drops_weak_one() {
        let options = EngineOptions {
            confidence_threshold: 0.90,
            top_label_only: true,
        };

        let kept = select_detections(vec![observation(&[("cup", 0.95)])], &options);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].bbox, CENTER);
        assert_eq!(kept[0].confidence, 0.95);

        let dropped = select_detections(vec![observation(&[("cup", 0.80)])], &options);
        assert!(dropped.is_empty());
    }

    #[test]
    fn out_of_range_scores_are_clamped_to_unit_interval() {
        let options = EngineOptions {
            confidence_threshold: 0.0,
            top_label_only: false,
        };
        let detections = select_detections(
            vec![observation(&[("cup", 1.7), ("egg", -0.2), ("bread", f32::INFINITY)])],
            &options,
        );
        let confidences: Vec<_> = detections.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![1.0, 0.0]);
    }

    #[test]
    fn average_latency_survives_huge_frame_counts() {
        assert_eq!(mean_duration(Duration::from_secs(3), 0), Duration::ZERO);
        let avg = mean_duration(Duration::from_millis(300), 3);
        assert!((avg.as_secs_f64() - 0.1).abs() < 1e-9);
        let count = 1u64 << 32;
        let avg = mean_duration(Duration::from_secs(count), count);
        assert!((avg.as_secs_f64() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn top_label_is_chosen_per_object_not_per_frame() {
        let options = EngineOptions::default();
        let detections = select_detections(
            vec![
                observation(&[("bread", 0.4), ("banana", 0.7)]),
                observation(&[("egg", 0.3), ("cup", 0.2)]),
            ],
            &options,
        );
        let labels: Vec<_> = detections.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["banana", "egg"]);
    }

    #[test]
    fn all_labels_mode_sorts_candidates_by_confidence() {
        let options = EngineOptions {
            confidence_threshold: 0.0,
            top_label_only: false,
        };
        let detections = select_detections(
            vec![observation(&[("bread", 0.4), ("banana", 0.7), ("egg", 0.55)])],
            &options,
        );
        let confidences: Vec<_> = detections.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.7, 0.55, 0.4]);
    }

    #[test]
    fn threshold_applies_after_top_label_selection() {
        let options = EngineOptions {
            confidence_threshold: 0.5,
            top_label_only: true,
        };
        // Best label is under threshold: the object vanishes, no fallback.
        let detections = select_detections(
            vec![observation(&[("bread", 0.45), ("banana", 0.40)])],
            &options,
        );
        assert!(detections.is_empty());
    }

    #[test]
    fn non_finite_confidences_are_ignored() {
        let detections = select_detections(
            vec![observation(&[("ghost", f32::NAN), ("cup", 0.6)])],
            &EngineOptions::default(),
        );
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "cup");
    }

    #[test]
    fn backend_failure_becomes_recoverable_inference_error() {
        let backend = StubBackend::new().then_fail("tensor shape mismatch");
        let mut engine = InferenceEngine::new(backend, EngineOptions::default()).unwrap();

        let err = engine.infer(&test_frame()).unwrap_err();
        assert!(err.is_recoverable());
        match err {
            PipelineError::InferenceError { pts, reason } => {
                assert_eq!(pts, Duration::from_millis(80));
                assert!(reason.contains("tensor shape mismatch"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        // The engine keeps working after a failed frame.
        assert!(engine.infer(&test_frame()).unwrap().is_empty());
    }

    #[test]
    fn warm_up_failure_is_model_load_failure() {
        let backend = StubBackend::new().with_warm_up_failure("model file truncated");
        let err = match InferenceEngine::new(backend, EngineOptions::default()) {
            Ok(_) => panic!("warm-up failure must abort setup"),
            Err(e) => e,
        };
        assert!(matches!(err, PipelineError::ModelLoadFailure { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let options = EngineOptions {
            confidence_threshold: 1.5,
            top_label_only: true,
        };
        assert!(matches!(
            InferenceEngine::new(StubBackend::new(), options),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}
