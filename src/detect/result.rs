use crate::geometry::NormalizedRect;

/// One candidate label for a detected region.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub label: String,
    pub confidence: f32,
}

impl Classification {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Raw backend output: one region and every label the model scored for it.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectObservation {
    pub bbox: NormalizedRect,
    pub labels: Vec<Classification>,
}

impl ObjectObservation {
    pub fn new(bbox: NormalizedRect, labels: Vec<Classification>) -> Self {
        Self { bbox, labels }
    }
}

/// Engine output handed to the coordinate mapper.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    /// 0.0 to 1.0.
    pub confidence: f32,
    /// Fractions of the analyzed buffer, origin top-left.
    pub bbox: NormalizedRect,
}
