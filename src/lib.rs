//! Detection Overlay Pipeline
//!
//! Decodes a recorded video asset frame by frame, runs an object detector on
//! each frame, and keeps a display-space overlay of labelled bounding boxes in
//! sync with what is on screen.
//!
//! # Architecture
//!
//! Two threads cooperate:
//!
//! 1. **Worker**: `FrameSource` decode, `InferenceEngine` detection and
//!    `CoordinateMapper` projection run sequentially, one frame at a time.
//! 2. **Render thread**: `DisplayConsumer` takes the newest finished result and
//!    swaps it onto the surface through the `OverlayRenderer`.
//!
//! They meet at a single-slot, latest-wins `LatestSlot`: a result the render
//! thread has not picked up yet is replaced by a newer one, never queued.
//!
//! # Module Structure
//!
//! - `frame`: decoded frames, the read-only inference view and display images
//! - `ingest`: frame sources (local files, synthetic `stub://` assets)
//! - `detect`: detector backends and the inference engine
//! - `geometry`: sizes, rectangles, content fit and the buffer-to-display transform
//! - `mapper`: projecting normalized detections into display rectangles
//! - `overlay`: overlay sets and atomic replacement on a render surface
//! - `render`: software canvas and JPEG snapshots
//! - `handoff`: the latest-wins slot
//! - `pipeline`: the worker loop and the render-side consumer
//! - `config`: file and environment configuration

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod handoff;
pub mod ingest;
pub mod mapper;
pub mod overlay;
pub mod pipeline;
pub mod render;

pub use config::OverlayConfig;
pub use detect::{
    Classification, CpuBackend, Detection, DetectorBackend, EngineOptions, InferenceEngine,
    ObjectObservation, StubBackend,
};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use error::PipelineError;
pub use frame::{DisplayImage, Frame, InferenceView};
pub use geometry::{ContentFit, GeometryContext, NormalizedRect, Rect, SharedGeometry, Size};
pub use handoff::{LatestSlot, Received};
pub use ingest::{FileConfig, FileSource, FrameSource};
pub use mapper::{CoordinateMapper, DisplayRect};
pub use overlay::{OverlayObserver, OverlayRenderer, OverlaySet, OverlayShape, RenderSurface};
pub use pipeline::{
    DisplayConsumer, PipelineCoordinator, PipelineHandle, PipelineReport, PipelineState,
    PipelineStats, Poll, RenderedResult, StopReason,
};
pub use render::{Canvas, DisplaySurface};
