//! Detection annotator
//!
//! Consumes a raw subscription at full source rate and publishes annotated
//! frames into its own broadcaster. Reading is never gated by time; only model
//! invocation and emission are:
//!
//! ```text
//!   raw queue ──drain all──► pending (latest candidate only)
//!                                │  elapsed >= 1/fps
//!                                ▼
//!                         detect + render ──► annotated broadcaster
//!                     (input keeps draining meanwhile)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::{DetectError, Detector};
use crate::broadcast::{Broadcaster, Delivery, StreamEnd, Subscription};
use crate::codec::render_detections;
use crate::registry::Frame;
use crate::stats::AnnotatorStats;

/// Per-pipeline annotation parameters, part of the stream key
///
/// Confidence is stored in thousandths so the value can be hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnnotationParams {
    conf_permille: u16,
    /// Maximum annotated frames per second
    pub fps: u32,
    /// Only every n-th raw frame is a detection candidate
    pub skip_frames: u32,
    /// Draw confidence tabs on the boxes
    pub labels: bool,
}

impl AnnotationParams {
    pub fn new(conf: f32, fps: u32, skip_frames: u32, labels: bool) -> Self {
        Self {
            conf_permille: (conf.clamp(0.0, 1.0) * 1000.0).round() as u16,
            fps: fps.max(1),
            skip_frames: skip_frames.max(1),
            labels,
        }
    }

    /// Minimum detection confidence
    pub fn conf(&self) -> f32 {
        f32::from(self.conf_permille) / 1000.0
    }

    /// Minimum spacing between emitted frames
    pub fn emit_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps))
    }
}

impl std::fmt::Display for AnnotationParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "detect(conf={:.3},fps={},skip={},labels={})",
            self.conf(),
            self.fps,
            self.skip_frames,
            self.labels
        )
    }
}

/// Annotator tuning shared by every pipeline
#[derive(Debug, Clone)]
pub struct AnnotatorConfig {
    /// Consecutive model failures before switching to passthrough
    pub max_consecutive_failures: u32,

    /// How often a degraded annotator retries the model
    pub recovery_probe: Duration,

    /// Draw boxes into the JPEG (detections are attached either way)
    pub render: bool,

    /// Minimum spacing between throughput warnings
    pub slow_warning_interval: Duration,

    /// Re-encode quality for rendered frames
    pub jpeg_quality: u8,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            recovery_probe: Duration::from_secs(10),
            render: true,
            slow_warning_interval: Duration::from_secs(10),
            jpeg_quality: 75,
        }
    }
}

impl AnnotatorConfig {
    pub fn max_consecutive_failures(mut self, n: u32) -> Self {
        self.max_consecutive_failures = n.max(1);
        self
    }

    pub fn recovery_probe(mut self, interval: Duration) -> Self {
        self.recovery_probe = interval;
        self
    }

    pub fn render(mut self, render: bool) -> Self {
        self.render = render;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }
}

/// Why an annotator stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotatorExit {
    /// The raw stream ended; the reason was forwarded downstream
    SourceEnded(StreamEnd),
    /// The raw subscription was closed
    InputClosed,
    /// The annotated broadcaster was terminated
    OutputClosed,
}

/// Measured raw frame rate over roughly one-second windows
#[derive(Debug)]
struct SourceRate {
    window_start: Instant,
    frames: u64,
    fps: f64,
}

impl SourceRate {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
            fps: 0.0,
        }
    }

    fn tick(&mut self) {
        self.frames += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.frames as f64 / elapsed.as_secs_f64();
            self.frames = 0;
            self.window_start = Instant::now();
        }
    }
}

#[derive(Debug)]
struct Intake {
    seen: u64,
    pending: Option<Frame>,
    rate: SourceRate,
}

#[derive(Debug, Default)]
struct Health {
    passthrough: bool,
    consecutive_failures: u32,
    last_probe: Option<Instant>,
    last_slow_warning: Option<Instant>,
}

/// Pipeline stage between a raw and an annotated broadcaster
pub struct DetectionAnnotator {
    params: AnnotationParams,
    config: AnnotatorConfig,
    detector: Arc<dyn Detector>,
    input: Subscription,
    output: Arc<Broadcaster>,
    stats: Arc<AnnotatorStats>,
}

impl DetectionAnnotator {
    pub fn new(
        params: AnnotationParams,
        config: AnnotatorConfig,
        detector: Arc<dyn Detector>,
        input: Subscription,
        output: Arc<Broadcaster>,
    ) -> Self {
        Self {
            params,
            config,
            detector,
            input,
            output,
            stats: Arc::new(AnnotatorStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<AnnotatorStats> {
        Arc::clone(&self.stats)
    }

    /// Run until the input ends or the output is terminated
    pub async fn run(self) -> AnnotatorExit {
        let interval = self.params.emit_interval();
        let mut intake = Intake {
            seen: 0,
            pending: None,
            rate: SourceRate::new(),
        };
        let mut health = Health::default();
        let mut last_emit: Option<Instant> = None;

        tracing::info!(
            stream = %self.output.key(),
            detector = self.detector.name(),
            "Annotator started"
        );

        let exit = loop {
            if self.output.is_terminated() {
                break AnnotatorExit::OutputClosed;
            }
            if let Some(exit) = self.drain_ready(&mut intake) {
                break exit;
            }

            let Some(candidate) = intake.pending.take() else {
                let item = self.input.recv().await;
                if let Some(exit) = self.accept(item, &mut intake) {
                    break exit;
                }
                continue;
            };

            let now = Instant::now();
            if let Some(due) = last_emit.map(|t| t + interval) {
                if now < due {
                    intake.pending = Some(candidate);
                    tokio::select! {
                        _ = tokio::time::sleep_until(due) => {}
                        item = self.input.recv() => {
                            if let Some(exit) = self.accept(item, &mut intake) {
                                break exit;
                            }
                        }
                    }
                    continue;
                }
            }

            last_emit = Some(now);
            if let Some(exit) = self.process(candidate, &mut intake, &mut health).await {
                break exit;
            }
        };

        tracing::info!(
            stream = %self.output.key(),
            exit = ?exit,
            emitted = self.stats.emitted(),
            "Annotator stopped"
        );
        exit
    }

    /// Take everything currently queued without waiting
    fn drain_ready(&self, intake: &mut Intake) -> Option<AnnotatorExit> {
        while let Some(item) = self.input.try_recv() {
            if let Some(exit) = self.accept(Some(item), intake) {
                return Some(exit);
            }
        }
        None
    }

    fn accept(&self, item: Option<Delivery>, intake: &mut Intake) -> Option<AnnotatorExit> {
        match item {
            Some(Delivery::Frame(frame)) => {
                self.stats.record_raw();
                intake.rate.tick();
                intake.seen += 1;
                if intake.seen % u64::from(self.params.skip_frames) == 0 {
                    self.stats.record_candidate();
                    intake.pending = Some(frame);
                }
                None
            }
            Some(Delivery::End(end)) => {
                self.output.terminate(end.clone());
                Some(AnnotatorExit::SourceEnded(end))
            }
            None => {
                self.output.terminate(StreamEnd::Shutdown);
                Some(AnnotatorExit::InputClosed)
            }
        }
    }

    async fn process(
        &self,
        candidate: Frame,
        intake: &mut Intake,
        health: &mut Health,
    ) -> Option<AnnotatorExit> {
        if health.passthrough {
            let probe_due = health
                .last_probe
                .map_or(true, |t| t.elapsed() >= self.config.recovery_probe);
            if !probe_due {
                self.emit(candidate);
                return None;
            }
            health.last_probe = Some(Instant::now());
        }

        // Keep draining while the model runs so pending stays fresh
        let result = {
            let work = self.annotate(&candidate);
            tokio::pin!(work);
            loop {
                tokio::select! {
                    biased;
                    result = &mut work => break result,
                    item = self.input.recv() => {
                        if let Some(exit) = self.accept(item, intake) {
                            return Some(exit);
                        }
                    }
                }
            }
        };

        match result {
            Ok((annotated, latency)) => {
                self.stats.record_processed(latency);
                self.check_budget(latency, intake, health);
                health.consecutive_failures = 0;
                if health.passthrough {
                    health.passthrough = false;
                    self.stats.set_passthrough(false);
                    tracing::info!(stream = %self.output.key(), "Detector recovered, annotation restored");
                }
                self.emit(annotated);
            }
            Err(e) => {
                self.stats.record_failure();
                health.consecutive_failures += 1;

                if health.passthrough {
                    tracing::debug!(stream = %self.output.key(), error = %e, "Recovery probe failed");
                    self.emit(candidate);
                } else if health.consecutive_failures >= self.config.max_consecutive_failures {
                    health.passthrough = true;
                    health.last_probe = Some(Instant::now());
                    self.stats.set_passthrough(true);
                    tracing::warn!(
                        stream = %self.output.key(),
                        failures = health.consecutive_failures,
                        error = %e,
                        "Detector failing, forwarding raw frames"
                    );
                } else {
                    tracing::warn!(
                        stream = %self.output.key(),
                        seq = candidate.seq,
                        failures = health.consecutive_failures,
                        error = %e,
                        "Detection failed, skipping frame"
                    );
                }
            }
        }
        None
    }

    /// Run the model and build the annotated frame
    async fn annotate(&self, frame: &Frame) -> Result<(Frame, Duration), DetectError> {
        let started = Instant::now();
        let mut detections = self.detector.detect(frame).await?;
        let latency = started.elapsed();

        let conf = self.params.conf();
        detections.retain(|d| d.confidence >= conf);

        let data = if self.config.render && !detections.is_empty() {
            let raw = frame.data.clone();
            let boxes = detections.clone();
            let labels = self.params.labels;
            let quality = self.config.jpeg_quality;
            match tokio::task::spawn_blocking(move || render_detections(&raw, &boxes, labels, quality)).await {
                Ok(Ok(rendered)) => rendered,
                Ok(Err(e)) => {
                    tracing::debug!(seq = frame.seq, error = %e, "Frame not renderable, forwarding raw bytes");
                    frame.data.clone()
                }
                Err(e) => {
                    tracing::error!(seq = frame.seq, error = %e, "Render task failed");
                    frame.data.clone()
                }
            }
        } else {
            frame.data.clone()
        };

        Ok((frame.annotated(data, detections), latency))
    }

    /// Warn when the model cannot keep up with the candidate rate
    fn check_budget(&self, latency: Duration, intake: &Intake, health: &mut Health) {
        if intake.rate.fps <= 0.0 {
            return;
        }
        let budget = Duration::from_secs_f64(f64::from(self.params.skip_frames) / intake.rate.fps);
        if latency <= budget {
            return;
        }

        self.stats.record_slow();
        let warn_due = health
            .last_slow_warning
            .map_or(true, |t| t.elapsed() >= self.config.slow_warning_interval);
        if warn_due {
            health.last_slow_warning = Some(Instant::now());
            tracing::warn!(
                stream = %self.output.key(),
                latency_ms = latency.as_millis() as u64,
                budget_ms = budget.as_millis() as u64,
                source_fps = intake.rate.fps,
                "Detector slower than candidate rate"
            );
        }
    }

    fn emit(&self, frame: Frame) {
        self.output.publish(frame);
        self.stats.record_emitted();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use bytes::Bytes;
    use futures::future::BoxFuture;

    use super::*;
    use crate::detect::{BBox, Detection};
    use crate::registry::StreamKey;

    struct StubDetector {
        latency: Duration,
        fail_first: u32,
        calls: AtomicU32,
    }

    impl StubDetector {
        fn new(latency: Duration, fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                latency,
                fail_first,
                calls: AtomicU32::new(0),
            })
        }
    }

    impl Detector for StubDetector {
        fn name(&self) -> &str {
            "stub"
        }

        fn detect<'a>(&'a self, frame: &'a Frame) -> BoxFuture<'a, Result<Vec<Detection>, DetectError>> {
            Box::pin(async move {
                tokio::time::sleep(self.latency).await;
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call < self.fail_first {
                    return Err(DetectError::Unavailable("model offline".into()));
                }
                Ok(vec![
                    Detection {
                        bbox: BBox::new(1.0, 1.0, 4.0, 4.0),
                        class: "car".into(),
                        confidence: 0.9,
                        source_frame_seq: frame.seq,
                    },
                    Detection {
                        bbox: BBox::new(2.0, 2.0, 4.0, 4.0),
                        class: "car".into(),
                        confidence: 0.1,
                        source_frame_seq: frame.seq,
                    },
                ])
            })
        }
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, Bytes::from_static(b"\xFF\xD8raw\xFF\xD9"))
    }

    fn pipeline(
        params: AnnotationParams,
        config: AnnotatorConfig,
        detector: Arc<dyn Detector>,
    ) -> (Arc<Broadcaster>, Arc<Broadcaster>, DetectionAnnotator) {
        let raw = Arc::new(Broadcaster::new(StreamKey::raw("test://cam"), 5));
        let out = Arc::new(Broadcaster::new(StreamKey::annotated("test://cam", params), 64));
        let input = raw.subscribe().unwrap();
        let annotator = DetectionAnnotator::new(params, config, detector, input, Arc::clone(&out));
        (raw, out, annotator)
    }

    #[test]
    fn test_params_display_and_interval() {
        let params = AnnotationParams::new(0.25, 10, 2, true);
        assert_eq!(params.to_string(), "detect(conf=0.250,fps=10,skip=2,labels=true)");
        assert_eq!(params.emit_interval(), Duration::from_millis(100));
        assert_eq!(params.conf(), 0.25);

        let clamped = AnnotationParams::new(1.7, 0, 0, false);
        assert_eq!(clamped.conf(), 1.0);
        assert_eq!(clamped.fps, 1);
        assert_eq!(clamped.skip_frames, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_latest_candidate_is_processed() {
        let params = AnnotationParams::new(0.25, 10, 2, false);
        let detector = StubDetector::new(Duration::ZERO, 0);
        let (raw, out, annotator) = pipeline(params, AnnotatorConfig::default().render(false), detector.clone());
        let out_sub = out.subscribe().unwrap();

        // Backlog before the annotator runs: candidates are seq 2 and 4
        for seq in 1..=4 {
            raw.publish(frame(seq));
        }
        let task = tokio::spawn(annotator.run());

        match out_sub.recv().await {
            Some(Delivery::Frame(f)) => {
                assert_eq!(f.seq, 4);
                let dets = f.detections.unwrap();
                assert_eq!(dets.len(), 1, "low-confidence detection filtered");
                assert_eq!(dets[0].source_frame_seq, 4);
            }
            other => panic!("unexpected delivery: {:?}", other),
        }
        assert_eq!(detector.calls.load(Ordering::SeqCst), 1);

        raw.terminate(StreamEnd::Shutdown);
        assert_eq!(task.await.unwrap(), AnnotatorExit::SourceEnded(StreamEnd::Shutdown));
        assert!(matches!(out_sub.recv().await, Some(Delivery::End(StreamEnd::Shutdown))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_emission_is_rate_limited() {
        let params = AnnotationParams::new(0.25, 5, 1, false);
        let (raw, out, annotator) = pipeline(
            params,
            AnnotatorConfig::default().render(false),
            StubDetector::new(Duration::from_millis(10), 0),
        );
        let out_sub = out.subscribe().unwrap();
        let stats = annotator.stats();
        tokio::spawn(annotator.run());

        // 30 fps for 2 seconds
        for seq in 1..=60 {
            raw.publish(frame(seq));
            tokio::time::sleep(Duration::from_millis(33)).await;
        }

        let mut emitted = Vec::new();
        while let Some(Delivery::Frame(f)) = out_sub.try_recv() {
            emitted.push(f.seq);
        }
        assert!((9..=11).contains(&emitted.len()), "emitted {:?}", emitted);
        assert!(emitted.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(stats.snapshot().raw_frames, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_passthrough_after_failures_then_recovery() {
        let params = AnnotationParams::new(0.25, 10, 1, false);
        let config = AnnotatorConfig::default()
            .render(false)
            .max_consecutive_failures(2)
            .recovery_probe(Duration::from_secs(1));
        // Two failures trip passthrough, the first probe fails, the second succeeds
        let detector = StubDetector::new(Duration::from_millis(5), 3);
        let (raw, out, annotator) = pipeline(params, config, detector.clone());
        let out_sub = out.subscribe().unwrap();
        let stats = annotator.stats();
        tokio::spawn(annotator.run());

        let mut received = Vec::new();
        for seq in 1..=35 {
            raw.publish(frame(seq));
            tokio::time::sleep(Duration::from_millis(100)).await;
            while let Some(Delivery::Frame(f)) = out_sub.try_recv() {
                received.push(f);
            }
        }

        let first_annotated = received
            .iter()
            .position(|f| f.is_annotated())
            .expect("annotation restored");
        assert!(first_annotated > 0);
        assert!(received[..first_annotated].iter().all(|f| !f.is_annotated()));
        assert!(received[first_annotated..].iter().all(|f| f.is_annotated()));

        let snap = stats.snapshot();
        assert_eq!(snap.failures, 3);
        assert!(!snap.passthrough);
        assert_eq!(detector.calls.load(Ordering::SeqCst) as u64, snap.processed + 3);
    }

    #[tokio::test]
    async fn test_output_termination_stops_annotator() {
        let params = AnnotationParams::new(0.25, 10, 1, false);
        let (raw, out, annotator) = pipeline(
            params,
            AnnotatorConfig::default(),
            StubDetector::new(Duration::ZERO, 0),
        );
        let task = tokio::spawn(annotator.run());

        out.terminate(StreamEnd::Shutdown);
        raw.publish(frame(1));

        assert_eq!(task.await.unwrap(), AnnotatorExit::OutputClosed);
        assert_eq!(raw.subscriber_count(), 0);
    }
}
