use std::sync::Arc;
use std::time::Duration;

use detection_overlay::{
    Canvas, Classification, ContentFit, CpuBackend, DisplayConsumer, EngineOptions, FileConfig,
    FileSource, InferenceEngine, LatestSlot, NormalizedRect, ObjectObservation, PipelineCoordinator,
    PipelineError, PipelineState, Poll, SharedGeometry, Size, StopReason, StubBackend,
};

fn geometry(width: f64, height: f64, fit: ContentFit) -> Arc<SharedGeometry> {
    Arc::new(SharedGeometry::new(Size::new(width, height), fit))
}

fn source(query: &str) -> FileSource {
    FileSource::new(FileConfig::new(format!("stub://clip?{query}"))).expect("synthetic asset")
}

#[test]
fn bright_square_is_detected_and_drawn_on_the_canvas() {
    let geometry = geometry(90.0, 160.0, ContentFit::AspectFill);
    let engine = InferenceEngine::new(CpuBackend::new(), EngineOptions::default()).unwrap();
    let pipeline = PipelineCoordinator::new(
        source("frames=3&width=160&height=90"),
        engine,
        geometry.clone(),
    );
    let slot = LatestSlot::new();
    let report = pipeline.run(&slot);
    assert_eq!(report.reason, StopReason::Exhausted);
    assert_eq!(report.stats.frames_processed, 3);

    let mut consumer = DisplayConsumer::new(slot, Canvas::new(90, 160), geometry);
    assert_eq!(consumer.poll(Duration::ZERO).unwrap(), Poll::Rendered(3));
    assert_eq!(consumer.poll(Duration::ZERO).unwrap(), Poll::Finished);

    let overlay = consumer.observer().current();
    assert_eq!(overlay.len(), 1);
    let shape = &overlay.shapes()[0];
    assert_eq!(shape.label, "bright_object");
    assert!(shape.caption().starts_with("bright_object\nConfidence: "));
    // The 160x90 buffer fills the 90x160 display exactly after the quarter turn.
    assert!(shape.rect.x >= 0.0 && shape.rect.max_x() <= 90.0);
    assert!(shape.rect.y >= 0.0 && shape.rect.max_y() <= 160.0);
    assert_eq!(consumer.surface().frames_presented(), 1);
}

#[test]
fn worker_thread_skips_corrupt_frames_and_finishes() {
    let geometry = geometry(180.0, 320.0, ContentFit::AspectFit);
    let engine = InferenceEngine::new(CpuBackend::new(), EngineOptions::default()).unwrap();
    let slot = LatestSlot::new();
    let handle = PipelineCoordinator::new(
        source("frames=12&width=64&height=36&corrupt_every=4"),
        engine,
        geometry.clone(),
    )
    .spawn(slot.clone())
    .unwrap();

    let mut consumer = DisplayConsumer::new(slot, Canvas::new(180, 320), geometry);
    let mut last = 0;
    loop {
        match consumer.poll(Duration::from_secs(5)).unwrap() {
            Poll::Rendered(sequence) => {
                assert!(sequence > last, "results must arrive in order");
                last = sequence;
            }
            Poll::Finished => break,
            Poll::DroppedStale(_) => panic!("geometry never changed"),
            Poll::Idle => panic!("worker stalled"),
        }
    }

    let report = handle.join().unwrap();
    assert_eq!(report.reason, StopReason::Exhausted);
    assert_eq!(report.stats.decode_failures, 3);
    assert_eq!(report.stats.frames_decoded, 9);
    assert_eq!(last, 9);
    assert!(consumer.rendered() >= 1);
}

#[test]
fn slow_consumer_only_sees_the_latest_result() {
    let geometry = geometry(90.0, 160.0, ContentFit::AspectFill);
    let engine = InferenceEngine::new(StubBackend::new(), EngineOptions::default()).unwrap();
    let slot = LatestSlot::new();
    let handle = PipelineCoordinator::new(
        source("frames=50&width=16&height=9"),
        engine,
        geometry.clone(),
    )
    .spawn(slot.clone())
    .unwrap();

    // Let the worker run ahead before the consumer looks at all.
    while !handle.is_finished() {
        std::thread::sleep(Duration::from_millis(5));
    }
    let report = handle.join().unwrap();
    assert_eq!(report.stats.results_posted, 50);
    assert_eq!(report.stats.results_superseded, 49);

    let mut consumer = DisplayConsumer::new(slot, Canvas::new(90, 160), geometry);
    assert_eq!(consumer.poll(Duration::ZERO).unwrap(), Poll::Rendered(50));
    assert_eq!(consumer.poll(Duration::ZERO).unwrap(), Poll::Finished);
}

#[test]
fn cancellation_stops_a_running_worker() {
    let geometry = geometry(90.0, 160.0, ContentFit::AspectFill);
    let backend = StubBackend::new().with_delay(Duration::from_millis(5));
    let engine = InferenceEngine::new(backend, EngineOptions::default()).unwrap();
    let slot = LatestSlot::new();
    let handle = PipelineCoordinator::new(source("frames=100000"), engine, geometry)
        .spawn(slot.clone())
        .unwrap();

    assert!(matches!(
        slot.wait(Duration::from_secs(5)),
        detection_overlay::Received::Value(_)
    ));
    handle.cancel();
    let report = handle.join().unwrap();

    assert_eq!(report.reason, StopReason::Cancelled);
    assert!(report.stats.frames_decoded < 100_000);
    assert!(slot.is_closed());
}

#[test]
fn threshold_and_top_label_rules_reach_the_overlay() {
    let geometry = geometry(9.0, 16.0, ContentFit::AspectFill);
    let observations = vec![
        ObjectObservation::new(
            NormalizedRect::new(0.1, 0.1, 0.2, 0.2),
            vec![
                Classification::new("dog", 0.6),
                Classification::new("cat", 0.95),
            ],
        ),
        ObjectObservation::new(
            NormalizedRect::new(0.5, 0.5, 0.2, 0.2),
            vec![Classification::new("cup", 0.80)],
        ),
    ];
    let options = EngineOptions {
        confidence_threshold: 0.9,
        top_label_only: true,
    };
    let engine = InferenceEngine::new(StubBackend::new().otherwise(observations), options).unwrap();
    let slot = LatestSlot::new();
    PipelineCoordinator::new(source("frames=1&width=16&height=9"), engine, geometry.clone())
        .run(&slot);

    let mut consumer = DisplayConsumer::new(slot, Canvas::new(9, 16), geometry);
    consumer.poll(Duration::ZERO).unwrap();
    let overlay = consumer.observer().current();
    let labels: Vec<_> = overlay.shapes().iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["cat"]);
}

#[test]
fn setup_failures_surface_before_the_loop_starts() {
    assert!(matches!(
        FileSource::new(FileConfig::new("https://example.com/clip.mp4")),
        Err(PipelineError::AssetUnreadable { .. })
    ));

    let broken = StubBackend::new().with_warm_up_failure("weights missing");
    assert!(matches!(
        InferenceEngine::new(broken, EngineOptions::default()),
        Err(PipelineError::ModelLoadFailure { .. })
    ));
}

#[test]
fn coordinator_reports_state_transitions() {
    let geometry = geometry(9.0, 16.0, ContentFit::AspectFill);
    let engine = InferenceEngine::new(StubBackend::new(), EngineOptions::default()).unwrap();
    let pipeline = PipelineCoordinator::new(source("frames=2&width=16&height=9"), engine, geometry);
    assert_eq!(pipeline.state(), PipelineState::Idle);

    let handle = pipeline.spawn(LatestSlot::new()).unwrap();
    let report = handle.join().unwrap();
    assert_eq!(report.reason, StopReason::Exhausted);
}
