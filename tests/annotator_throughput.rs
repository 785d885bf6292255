//! Annotator pacing against a fast source and a slow model

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

use parkcast::broadcast::{Broadcaster, Delivery};
use parkcast::detect::{
    AnnotationParams, AnnotatorConfig, BBox, DetectError, Detection, DetectionAnnotator, Detector,
};
use parkcast::registry::{Frame, StreamKey};
use parkcast::StreamEnd;

/// Fixed-latency model reporting one car per frame
struct SlowModel {
    latency: Duration,
    calls: AtomicU64,
}

impl Detector for SlowModel {
    fn name(&self) -> &str {
        "slow-model"
    }

    fn detect<'a>(&'a self, frame: &'a Frame) -> BoxFuture<'a, Result<Vec<Detection>, DetectError>> {
        Box::pin(async move {
            tokio::time::sleep(self.latency).await;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Detection {
                bbox: BBox::new(10.0, 10.0, 50.0, 30.0),
                class: "car".into(),
                confidence: 0.8,
                source_frame_seq: frame.seq,
            }])
        })
    }
}

#[tokio::test(start_paused = true)]
async fn annotated_rate_tracks_requested_fps() {
    const SOURCE_FPS: u64 = 30;
    const SECONDS: u64 = 60;

    let params = AnnotationParams::new(0.25, 10, 3, false);
    let model = Arc::new(SlowModel {
        latency: Duration::from_millis(80),
        calls: AtomicU64::new(0),
    });

    let raw = Arc::new(Broadcaster::new(StreamKey::raw("test://lot"), 5));
    let annotated = Arc::new(Broadcaster::new(StreamKey::annotated("test://lot", params), 5));
    let viewer = annotated.subscribe().unwrap();

    let annotator = DetectionAnnotator::new(
        params,
        AnnotatorConfig::default().render(false),
        model.clone(),
        raw.subscribe().unwrap(),
        Arc::clone(&annotated),
    );
    let stats = annotator.stats();
    let annotator_task = tokio::spawn(annotator.run());

    let source = {
        let raw = Arc::clone(&raw);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_nanos(1_000_000_000 / SOURCE_FPS));
            for seq in 1..=SOURCE_FPS * SECONDS {
                ticker.tick().await;
                raw.publish(Frame::new(seq, Bytes::from_static(b"\xFF\xD8lot\xFF\xD9")));
            }
            // Let the last frame reach the annotator before ending the stream
            tokio::time::sleep(Duration::from_millis(200)).await;
            raw.terminate(StreamEnd::Shutdown);
        })
    };

    let mut received = 0u64;
    let mut max_lag = 0u64;
    let mut last_seq = 0u64;
    loop {
        match viewer.recv().await {
            Some(Delivery::Frame(frame)) => {
                assert!(frame.seq > last_seq);
                last_seq = frame.seq;
                let dets = frame.detections.as_ref().expect("annotated frame");
                assert_eq!(dets[0].source_frame_seq, frame.seq);

                max_lag = max_lag.max(raw.last_seq().saturating_sub(frame.seq));
                received += 1;
            }
            Some(Delivery::End(_)) | None => break,
        }
    }
    source.await.unwrap();
    annotator_task.await.unwrap();

    let expected = 10 * SECONDS;
    let tolerance = expected / 10;
    assert!(
        received.abs_diff(expected) <= tolerance,
        "received {received}, expected {expected} ± {tolerance}"
    );

    // Latency 80 ms plus at most one emit interval, in 33 ms source frames
    assert!(max_lag <= 9, "max lag {max_lag} frames");

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.raw_frames, SOURCE_FPS * SECONDS);
    assert!(model.calls.load(Ordering::SeqCst) <= snapshot.candidates);
    assert!(!snapshot.passthrough);
}
