use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Classification, ObjectObservation};
use crate::frame::InferenceView;
use crate::geometry::NormalizedRect;

/// Label reported for the region found by `CpuBackend`.
pub const BRIGHT_OBJECT_LABEL: &str = "bright_object";

/// Pixels at or above this luma count as part of the object.
const DEFAULT_LUMA_THRESHOLD: u8 = 200;

/// CPU backend: bounding box of the bright pixels in the frame.
///
/// Needs no model file. Confidence is the share of bright pixels inside the
/// box, so a solid bright shape scores close to 1.0 and scattered highlights
/// score low.
pub struct CpuBackend {
    luma_threshold: u8,
    /// Sample every `step`-th pixel on both axes.
    step: u32,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self {
            luma_threshold: DEFAULT_LUMA_THRESHOLD,
            step: 2,
        }
    }

    pub fn with_luma_threshold(mut self, threshold: u8) -> Self {
        self.luma_threshold = threshold;
        self
    }

    pub fn with_step(mut self, step: u32) -> Self {
        self.step = step.max(1);
        self
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn luma([r, g, b]: [u8; 3]) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn detect(&mut self, view: InferenceView<'_>) -> Result<Vec<ObjectObservation>> {
        let (width, height) = (view.width(), view.height());
        let mut min = (u32::MAX, u32::MAX);
        let mut max = (0u32, 0u32);
        let mut bright = Vec::new();

        for y in (0..height).step_by(self.step as usize) {
            for x in (0..width).step_by(self.step as usize) {
                let Some(px) = view.pixel(x, y) else {
                    continue;
                };
                if luma(px) >= self.luma_threshold {
                    min = (min.0.min(x), min.1.min(y));
                    max = (max.0.max(x), max.1.max(y));
                    bright.push((x, y));
                }
            }
        }

        if bright.is_empty() {
            return Ok(Vec::new());
        }

        // Sampled extents; each sample stands for a step x step cell.
        let x1 = min.0;
        let y1 = min.1;
        let x2 = (max.0 + self.step).min(width);
        let y2 = (max.1 + self.step).min(height);
        let cells_x = (x2 - x1).div_ceil(self.step);
        let cells_y = (y2 - y1).div_ceil(self.step);
        let confidence = bright.len() as f32 / (cells_x * cells_y).max(1) as f32;

        let bbox = NormalizedRect::new(
            x1 as f32 / width as f32,
            y1 as f32 / height as f32,
            (x2 - x1) as f32 / width as f32,
            (y2 - y1) as f32 / height as f32,
        );
        Ok(vec![ObjectObservation::new(
            bbox,
            vec![Classification::new(BRIGHT_OBJECT_LABEL, confidence.min(1.0))],
        )])
    }
}
