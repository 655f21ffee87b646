//! overlayd - Play a recorded asset through the detection overlay pipeline.
//!
//! The worker thread decodes and detects; the main thread plays the render
//! side, composing each newest result onto a software canvas and optionally
//! writing every N-th composed picture as a JPEG snapshot.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use detection_overlay::{
    Canvas, DisplayConsumer, FileConfig, FileSource, InferenceEngine, LatestSlot, OverlayConfig,
    PipelineCoordinator, Poll, SharedGeometry,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run object detection over a recorded video and render the overlay"
)]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = "OVERLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Asset to play (local path or stub://...). Overrides the config.
    #[arg(long)]
    asset: Option<String>,

    /// Directory for JPEG snapshots. Overrides the config.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Stop after this many rendered results.
    #[arg(long, env = "OVERLAY_FRAMES_LIMIT")]
    frames_limit: Option<u64>,

    /// How long the render loop waits for a new result before idling.
    #[arg(long, default_value = "50")]
    poll_ms: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = OverlayConfig::load_from(args.config.as_deref())?;
    if let Some(asset) = args.asset {
        cfg.asset_path = asset;
    }
    if let Some(dir) = args.snapshot_dir {
        cfg.snapshot.dir = Some(dir);
    }
    cfg.validate()?;

    // Setup failures abort here, before any thread starts.
    let source = FileSource::new(FileConfig::new(&cfg.asset_path))?;
    let engine = InferenceEngine::from_boxed(cfg.build_backend()?, cfg.engine_options())?;
    let geometry = Arc::new(SharedGeometry::new(
        cfg.display.size(),
        cfg.display.content_fit,
    ));
    if let Some(dir) = &cfg.snapshot.dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create snapshot dir {}", dir.display()))?;
    }

    let slot = LatestSlot::new();
    let handle = PipelineCoordinator::new(source, engine, geometry.clone()).spawn(slot.clone())?;

    let cancel = handle.cancel_flag();
    ctrlc::set_handler(move || {
        cancel.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");
    log::info!(
        "overlayd playing {} on a {}x{} display ({:?})",
        cfg.asset_path,
        cfg.display.width,
        cfg.display.height,
        cfg.display.content_fit
    );

    let mut consumer = DisplayConsumer::new(
        slot,
        Canvas::new(cfg.display.width, cfg.display.height),
        geometry,
    );
    let outcome = render_loop(
        &mut consumer,
        &cfg,
        args.frames_limit,
        Duration::from_millis(args.poll_ms),
    );
    if outcome.is_err() {
        handle.cancel();
    }
    consumer.close();

    let report = handle.join()?;
    log::info!(
        "overlayd finished: {:?}; rendered={} stale_dropped={} decoded={} superseded={}",
        report.reason,
        consumer.rendered(),
        consumer.dropped_stale(),
        report.stats.frames_decoded,
        report.stats.results_superseded
    );
    outcome
}

fn render_loop(
    consumer: &mut DisplayConsumer<Canvas>,
    cfg: &OverlayConfig,
    frames_limit: Option<u64>,
    poll_timeout: Duration,
) -> Result<()> {
    loop {
        match consumer.poll(poll_timeout)? {
            Poll::Rendered(sequence) => {
                let rendered = consumer.rendered();
                if let Some(dir) = &cfg.snapshot.dir {
                    if rendered % cfg.snapshot.every == 0 {
                        write_snapshot(consumer.surface(), dir, sequence)?;
                    }
                }
                if frames_limit.is_some_and(|limit| rendered >= limit) {
                    log::info!("frame limit reached after {} results", rendered);
                    return Ok(());
                }
            }
            Poll::DroppedStale(_) | Poll::Idle => {}
            Poll::Finished => return Ok(()),
        }
    }
}

fn write_snapshot(canvas: &Canvas, dir: &Path, sequence: u64) -> Result<()> {
    let path = dir.join(format!("overlay_{sequence:06}.jpg"));
    canvas.save_jpeg(&path)?;
    log::info!("snapshot written to {}", path.display());
    Ok(())
}
