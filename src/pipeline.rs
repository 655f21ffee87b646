//! Worker loop and render-side consumer.
//!
//! The worker thread owns the frame source, the inference engine and the
//! coordinate mapper. Per frame it decodes, infers, maps against a snapshot of
//! the display geometry and posts the finished result into a `LatestSlot`. The
//! render thread owns a `DisplayConsumer`, which takes whatever is newest from
//! the slot and swaps it onto the surface. The slot is the only place the two
//! threads meet, apart from the display geometry the render thread publishes.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::detect::InferenceEngine;
use crate::error::PipelineError;
use crate::frame::DisplayImage;
use crate::geometry::{GeometryContext, SharedGeometry, Size};
use crate::handoff::{LatestSlot, Received};
use crate::ingest::FrameSource;
use crate::mapper::CoordinateMapper;
use crate::overlay::{OverlayObserver, OverlayRenderer, OverlaySet};
use crate::render::DisplaySurface;

/// Frames between throughput log lines.
const TIMING_LOG_INTERVAL: u64 = 300;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    /// Terminal.
    Stopped,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// Why the worker loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    Exhausted,
    Cancelled,
    /// The render side closed the slot.
    ConsumerClosed,
    Failed(String),
}

/// One completed iteration, ready for display.
#[derive(Debug)]
pub struct RenderedResult {
    pub sequence: u64,
    pub image: DisplayImage,
    pub overlay: OverlaySet,
    /// Geometry the overlay was mapped against.
    pub geometry: GeometryContext,
}

/// Counters shared between the worker and whoever watches it.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_decoded: AtomicU64,
    frames_processed: AtomicU64,
    decode_failures: AtomicU64,
    inference_failures: AtomicU64,
    results_posted: AtomicU64,
    results_superseded: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_decoded: u64,
    /// Frames that made it through inference and mapping.
    pub frames_processed: u64,
    pub decode_failures: u64,
    pub inference_failures: u64,
    pub results_posted: u64,
    pub results_superseded: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            results_posted: self.results_posted.load(Ordering::Relaxed),
            results_superseded: self.results_superseded.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineReport {
    pub reason: StopReason,
    pub stats: StatsSnapshot,
}

// ----------------------------------------------------------------------------
// Coordinator (worker side)
// ----------------------------------------------------------------------------

pub struct PipelineCoordinator<S: FrameSource> {
    source: S,
    engine: InferenceEngine,
    mapper: CoordinateMapper,
    geometry: Arc<SharedGeometry>,
    state: Arc<AtomicU8>,
    cancel: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
    sequence: u64,
}

impl<S: FrameSource + 'static> PipelineCoordinator<S> {
    /// Both `source` and `engine` are already set up; setup errors surfaced there.
    pub fn new(source: S, engine: InferenceEngine, geometry: Arc<SharedGeometry>) -> Self {
        Self {
            source,
            engine,
            mapper: CoordinateMapper::new(),
            geometry,
            state: Arc::new(AtomicU8::new(PipelineState::Idle as u8)),
            cancel: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(PipelineStats::default()),
            sequence: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Cancellation flag checked before each frame.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Run on a dedicated worker thread.
    pub fn spawn(self, slot: LatestSlot<RenderedResult>) -> Result<PipelineHandle> {
        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let stats = self.stats.clone();
        let join = std::thread::Builder::new()
            .name("overlay-worker".to_string())
            .spawn(move || self.run(&slot))?;
        Ok(PipelineHandle {
            state,
            cancel,
            stats,
            join: Some(join),
        })
    }

    /// Drive the loop on the calling thread until the source ends or the run is cancelled.
    ///
    /// The slot is closed on exit so the consumer sees the end of the stream.
    pub fn run(mut self, slot: &LatestSlot<RenderedResult>) -> PipelineReport {
        self.state
            .store(PipelineState::Running as u8, Ordering::SeqCst);
        log::info!("pipeline running (backend={})", self.engine.backend_name());

        let reason = self.run_loop(slot);

        slot.close();
        self.state
            .store(PipelineState::Stopped as u8, Ordering::SeqCst);
        let stats = self.stats.snapshot();
        log::info!(
            "pipeline stopped: {:?} (frames={} processed={} decode_failures={} inference_failures={} posted={} superseded={})",
            reason,
            stats.frames_decoded,
            stats.frames_processed,
            stats.decode_failures,
            stats.inference_failures,
            stats.results_posted,
            stats.results_superseded
        );
        PipelineReport { reason, stats }
    }

    fn run_loop(&mut self, slot: &LatestSlot<RenderedResult>) -> StopReason {
        let mut map_time = Duration::ZERO;
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return StopReason::Cancelled;
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return StopReason::Exhausted,
                Err(e) if e.is_recoverable() => {
                    PipelineStats::bump(&self.stats.decode_failures);
                    log::warn!("skipping frame: {}", e);
                    continue;
                }
                Err(e) => return StopReason::Failed(e.to_string()),
            };
            PipelineStats::bump(&self.stats.frames_decoded);

            let detections = match self.engine.infer(&frame) {
                Ok(detections) => detections,
                Err(e) => {
                    let counter = match e {
                        PipelineError::FrameDecodeError { .. } => &self.stats.decode_failures,
                        _ => &self.stats.inference_failures,
                    };
                    PipelineStats::bump(counter);
                    log::warn!("skipping frame: {}", e);
                    continue;
                }
            };

            let map_start = Instant::now();
            let snapshot = self.geometry.snapshot();
            let geometry = snapshot.context_for(frame.size());
            let rects = self.mapper.map_all(&detections, &geometry);
            map_time += map_start.elapsed();
            PipelineStats::bump(&self.stats.frames_processed);

            self.sequence += 1;
            let result = RenderedResult {
                sequence: self.sequence,
                overlay: OverlaySet::new(self.sequence, snapshot.version, rects),
                image: frame.into_display_image(),
                geometry,
            };

            if self.cancel.load(Ordering::SeqCst) {
                return StopReason::Cancelled;
            }
            match slot.post(result) {
                Ok(stale) => {
                    PipelineStats::bump(&self.stats.results_posted);
                    if let Some(stale) = stale {
                        PipelineStats::bump(&self.stats.results_superseded);
                        log::debug!("result #{} superseded before display", stale.sequence);
                    }
                }
                Err(_) => return StopReason::ConsumerClosed,
            }

            if self.sequence % TIMING_LOG_INTERVAL == 0 {
                log::info!(
                    "pipeline timings: frames={} infer_ms_per_frame={:.2} map_ms_per_frame={:.3}",
                    self.sequence,
                    self.engine.average_latency().as_secs_f64() * 1000.0,
                    map_time.as_secs_f64() * 1000.0 / self.sequence as f64
                );
            }
        }
    }
}

/// Control handle for a spawned worker.
#[derive(Debug)]
pub struct PipelineHandle {
    state: Arc<AtomicU8>,
    cancel: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
    join: Option<JoinHandle<PipelineReport>>,
}

impl PipelineHandle {
    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Ask the worker to stop before its next frame.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |j| j.is_finished())
    }

    pub fn join(mut self) -> Result<PipelineReport> {
        let join = self
            .join
            .take()
            .ok_or_else(|| anyhow!("pipeline worker already joined"))?;
        join.join()
            .map_err(|_| anyhow!("pipeline worker thread panicked"))
    }
}

// ----------------------------------------------------------------------------
// Display consumer (render side)
// ----------------------------------------------------------------------------

/// What one `poll` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Poll {
    /// Result with this sequence number is now on screen.
    Rendered(u64),
    /// Result was mapped against display geometry that has since changed.
    DroppedStale(u64),
    Idle,
    Finished,
}

/// Render-thread end of the pipeline.
///
/// Owns the overlay renderer and is the only writer of the display geometry.
pub struct DisplayConsumer<D: DisplaySurface> {
    slot: LatestSlot<RenderedResult>,
    renderer: OverlayRenderer<D>,
    geometry: Arc<SharedGeometry>,
    rendered: u64,
    dropped_stale: u64,
}

impl<D: DisplaySurface> DisplayConsumer<D> {
    pub fn new(
        slot: LatestSlot<RenderedResult>,
        mut surface: D,
        geometry: Arc<SharedGeometry>,
    ) -> Self {
        surface.resize(geometry.snapshot().display);
        Self {
            slot,
            renderer: OverlayRenderer::new(surface),
            geometry,
            rendered: 0,
            dropped_stale: 0,
        }
    }

    pub fn observer(&self) -> OverlayObserver {
        self.renderer.observer()
    }

    pub fn surface(&self) -> &D {
        self.renderer.surface()
    }

    pub fn rendered(&self) -> u64 {
        self.rendered
    }

    pub fn dropped_stale(&self) -> u64 {
        self.dropped_stale
    }

    /// New display bounds. The worker picks them up on its next frame.
    pub fn resize(&mut self, display: Size) {
        if self.geometry.set_display_bounds(display) {
            log::info!("display resized to {}x{}", display.width, display.height);
            self.renderer.surface_mut().resize(display);
        }
    }

    /// Take the newest result, waiting at most `timeout`, and put it on screen.
    ///
    /// For a loop that has nothing else to do. A UI thread uses `try_poll`.
    pub fn poll(&mut self, timeout: Duration) -> Result<Poll> {
        let received = self.slot.wait(timeout);
        self.handle(received)
    }

    /// Like `poll`, but never waits on the worker.
    pub fn try_poll(&mut self) -> Result<Poll> {
        let received = self.slot.try_recv();
        self.handle(received)
    }

    /// Stop accepting results; the worker ends on its next post.
    pub fn close(&self) {
        self.slot.close();
    }

    fn handle(&mut self, received: Received<RenderedResult>) -> Result<Poll> {
        match received {
            Received::Value(result) => self.present(result),
            Received::Empty => Ok(Poll::Idle),
            Received::Closed => Ok(Poll::Finished),
        }
    }

    fn present(&mut self, result: RenderedResult) -> Result<Poll> {
        let sequence = result.sequence;
        if result.overlay.geometry_version != self.geometry.snapshot().version {
            self.dropped_stale += 1;
            log::debug!("dropping result #{} mapped against old geometry", sequence);
            return Ok(Poll::DroppedStale(sequence));
        }
        self.renderer
            .surface_mut()
            .show_image(result.image, result.geometry);
        self.renderer.replace(result.overlay)?;
        self.rendered += 1;
        Ok(Poll::Rendered(sequence))
    }
}
