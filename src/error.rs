//! Pipeline error taxonomy.
//!
//! Setup failures (`AssetUnreadable`, `ModelLoadFailure`, `InvalidConfig`) abort a
//! pipeline run before the worker loop starts. Per-frame failures
//! (`FrameDecodeError`, `InferenceError`) are skipped by the worker and only
//! counted and logged.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("asset '{path}' is unreadable: {reason}")]
    AssetUnreadable { path: String, reason: String },

    #[error("failed to load model '{model}': {reason}")]
    ModelLoadFailure { model: String, reason: String },

    #[error("frame #{index} failed to decode: {reason}")]
    FrameDecodeError { index: u64, reason: String },

    #[error("inference failed on frame at {pts:?}: {reason}")]
    InferenceError { pts: Duration, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    pub fn asset(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::AssetUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn model(model: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ModelLoadFailure {
            model: model.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures the worker skips over instead of stopping.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::FrameDecodeError { .. } | Self::InferenceError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_per_frame_errors_are_recoverable() {
        assert!(!PipelineError::asset("clip.mp4", "missing").is_recoverable());
        assert!(!PipelineError::model("yolo.onnx", "bad graph").is_recoverable());
        assert!(!PipelineError::InvalidConfig("x".into()).is_recoverable());
        assert!(PipelineError::FrameDecodeError {
            index: 3,
            reason: "corrupt packet".into()
        }
        .is_recoverable());
        assert!(PipelineError::InferenceError {
            pts: Duration::from_millis(40),
            reason: "shape mismatch".into()
        }
        .is_recoverable());
    }

    #[test]
    fn messages_name_the_offending_input() {
        let err = PipelineError::asset("/tmp/missing.mp4", "no such file");
        assert_eq!(
            err.to_string(),
            "asset '/tmp/missing.mp4' is unreadable: no such file"
        );
    }
}
