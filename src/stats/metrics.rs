//! Statistics for viewer sessions, annotators and the server

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Per-session delivery statistics
///
/// Owned by a single session task, so plain fields suffice.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Frames written to the viewer
    pub delivered: u64,
    /// Frames missed through sequence gaps (drop-oldest or upstream skipping)
    pub gap_skipped: u64,
    /// Frames dropped locally to honour the session fps cap
    pub paced_skipped: u64,
    /// Total payload bytes written
    pub bytes_sent: u64,
    /// When the session started
    pub started_at: Instant,
    last_seq: Option<u64>,
    window_start: Instant,
    window_frames: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            delivered: 0,
            gap_skipped: 0,
            paced_skipped: 0,
            bytes_sent: 0,
            started_at: now,
            last_seq: None,
            window_start: now,
            window_frames: 0,
        }
    }

    /// Account for a received sequence number, counting any gap before it
    pub fn observe_seq(&mut self, seq: u64) {
        if let Some(last) = self.last_seq {
            if seq > last + 1 {
                self.gap_skipped += seq - last - 1;
            }
        }
        self.last_seq = Some(seq);
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.delivered += 1;
        self.window_frames += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_paced(&mut self) {
        self.paced_skipped += 1;
    }

    /// Frames the viewer did not receive
    pub fn skipped(&self) -> u64 {
        self.gap_skipped + self.paced_skipped
    }

    /// Delivery rate since the previous call; starts a new window
    pub fn take_window_fps(&mut self) -> f64 {
        let now = Instant::now();
        let secs = now.duration_since(self.window_start).as_secs_f64();
        let fps = if secs > 0.0 {
            self.window_frames as f64 / secs
        } else {
            0.0
        };
        self.window_start = now;
        self.window_frames = 0;
        fps
    }

    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters shared between an annotator task and introspection
#[derive(Debug, Default)]
pub struct AnnotatorStats {
    raw_frames: AtomicU64,
    candidates: AtomicU64,
    processed: AtomicU64,
    emitted: AtomicU64,
    failures: AtomicU64,
    slow_inferences: AtomicU64,
    last_latency_ms: AtomicU64,
    passthrough: AtomicBool,
}

/// Point-in-time copy of [`AnnotatorStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnnotatorSnapshot {
    pub raw_frames: u64,
    pub candidates: u64,
    pub processed: u64,
    pub emitted: u64,
    pub failures: u64,
    pub slow_inferences: u64,
    pub last_latency_ms: u64,
    pub passthrough: bool,
}

impl AnnotatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_raw(&self) {
        self.raw_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_candidate(&self) {
        self.candidates.fetch_add(1, Ordering::Relaxed);
    }

    /// A model call completed successfully
    pub fn record_processed(&self, latency: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.last_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slow(&self) {
        self.slow_inferences.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_passthrough(&self, on: bool) {
        self.passthrough.store(on, Ordering::Relaxed);
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> AnnotatorSnapshot {
        AnnotatorSnapshot {
            raw_frames: self.raw_frames.load(Ordering::Relaxed),
            candidates: self.candidates.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            slow_inferences: self.slow_inferences.load(Ordering::Relaxed),
            last_latency_ms: self.last_latency_ms.load(Ordering::Relaxed),
            passthrough: self.passthrough.load(Ordering::Relaxed),
        }
    }
}

/// Server-wide counters
#[derive(Debug)]
pub struct ServerStats {
    total_sessions: AtomicU64,
    active_sessions: AtomicU64,
    bytes_sent: AtomicU64,
    started_at: Instant,
}

/// Serializable view of [`ServerStats`]
#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub bytes_sent: u64,
    pub uptime_secs: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            total_sessions: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn session_opened(&self) {
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self, bytes_sent: u64) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes_sent, Ordering::Relaxed);
    }

    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            total_sessions: self.total_sessions.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}
