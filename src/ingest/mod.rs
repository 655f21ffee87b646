//! Frame sources.
//!
//! - Local video files (FFmpeg decoder, feature: ingest-file-ffmpeg)
//! - Synthetic `stub://` assets (always available; demos and tests)
//!
//! Every source hands out frames in non-decreasing presentation order and ends
//! with `Ok(None)`. Once exhausted a source stays exhausted. A frame that fails
//! to decode is reported as `PipelineError::FrameDecodeError`; the caller may
//! keep pulling after it.

use crate::error::PipelineError;
use crate::frame::Frame;

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;

pub use file::{FileConfig, FileSource, FileStats};

/// Sequential decoder over one asset.
pub trait FrameSource: Send {
    /// Next frame in presentation order, or `Ok(None)` once the asset is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        (**self).next_frame()
    }
}
