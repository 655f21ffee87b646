#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Classification, ObjectObservation};
use crate::frame::InferenceView;
use crate::geometry::NormalizedRect;

/// Proposals whose best class scores below this are discarded before NMS.
const MIN_PROPOSAL_SCORE: f32 = 0.25;
/// Labels scoring below this are not reported as candidates for a region.
const MIN_CANDIDATE_SCORE: f32 = 0.05;
/// Candidate labels kept per region.
const MAX_CANDIDATES: usize = 5;
/// IoU above which the weaker of two proposals is suppressed.
const IOU_THRESHOLD: f32 = 0.45;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Expects an NCHW float input and a `[1, 4 + classes, proposals]` output where
/// the first four rows are `cx, cy, w, h` in input pixels and the rest are
/// per-class scores.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    labels: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            labels: Vec::new(),
        })
    }

    /// Class names, one per line, in model output order.
    pub fn with_labels_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels from {}", path.display()))?;
        self.labels = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Ok(self)
    }

    fn label(&self, class: usize) -> String {
        self.labels
            .get(class)
            .cloned()
            .unwrap_or_else(|| format!("class_{class}"))
    }

    /// Nearest-sample resize into the model's input size, scaled to 0..1.
    fn build_input(&self, view: InferenceView<'_>) -> Result<Tensor> {
        if view.width() == 0 || view.height() == 0 {
            return Err(anyhow!("frame has zero size"));
        }
        let (src_w, src_h) = (view.width() as usize, view.height() as usize);
        let (dst_w, dst_h) = (self.width as usize, self.height as usize);
        let pixels = view.pixels();
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, dst_h, dst_w),
            |(_, channel, y, x)| {
                let sx = x * src_w / dst_w;
                let sy = y * src_h / dst_h;
                pixels[(sy * src_w + sx) * 3 + channel] as f32 / 255.0
            },
        );
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<ObjectObservation>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = scores.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let (rows, proposals) = (shape[1], shape[2]);
        let classes = rows - 4;
        let (in_w, in_h) = (self.width as f32, self.height as f32);

        let mut candidates: Vec<(f32, ObjectObservation)> = Vec::new();
        for i in 0..proposals {
            let mut labels: Vec<(usize, f32)> = (0..classes)
                .map(|c| (c, scores[[0, 4 + c, i]]))
                .filter(|(_, s)| s.is_finite() && *s >= MIN_CANDIDATE_SCORE)
                .collect();
            labels.sort_by(|a, b| b.1.total_cmp(&a.1));
            let Some(&(_, best)) = labels.first() else {
                continue;
            };
            if best < MIN_PROPOSAL_SCORE {
                continue;
            }
            labels.truncate(MAX_CANDIDATES);

            let cx = scores[[0, 0, i]] / in_w;
            let cy = scores[[0, 1, i]] / in_h;
            let w = scores[[0, 2, i]] / in_w;
            let h = scores[[0, 3, i]] / in_h;
            let bbox = NormalizedRect::new(cx - w / 2.0, cy - h / 2.0, w, h).clamped();
            let labels = labels
                .into_iter()
                .map(|(c, s)| Classification::new(self.label(c), s))
                .collect();
            candidates.push((best, ObjectObservation::new(bbox, labels)));
        }

        Ok(nms(candidates, IOU_THRESHOLD))
    }
}

/// Greedy non-maximum suppression on best-label score.
fn nms(
    mut candidates: Vec<(f32, ObjectObservation)>,
    iou_threshold: f32,
) -> Vec<ObjectObservation> {
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
    let mut kept: Vec<ObjectObservation> = Vec::new();
    for (_, candidate) in candidates {
        if kept
            .iter()
            .all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, view: InferenceView<'_>) -> Result<Vec<ObjectObservation>> {
        let input = self.build_input(view)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        let zeros = Tensor::zero::<f32>(&[1, 3, self.height as usize, self.width as usize])?;
        self.model
            .run(tvec!(zeros.into()))
            .context("ONNX warm-up run failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(x: f32, score: f32) -> (f32, ObjectObservation) {
        (
            score,
            ObjectObservation::new(
                NormalizedRect::new(x, 0.0, 0.5, 0.5),
                vec![Classification::new("cup", score)],
            ),
        )
    }

    #[test]
    fn nms_keeps_strongest_of_overlapping_boxes() {
        let kept = nms(vec![obs(0.0, 0.6), obs(0.05, 0.9), obs(0.5, 0.4)], 0.45);
        let scores: Vec<_> = kept.iter().map(|o| o.labels[0].confidence).collect();
        assert_eq!(scores, vec![0.9, 0.4]);
    }
}
