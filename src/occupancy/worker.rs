//! Periodic occupancy worker
//!
//! Once per interval and per camera: fetch one frame, run the detector, match
//! detections against the camera's zones and commit the result as one batch.
//! A failed cycle is logged and skipped, the next tick tries again.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::matcher::{match_zones, MatchConfig};
use super::store::{OccupancySink, StoreError, ZoneSource};
use super::types::ZoneState;
use crate::codec::{self, CodecError};
use crate::detect::{DetectError, Detector};
use crate::registry::Frame;
use crate::source::{SourceError, SourceFactory};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Time between cycles for one camera
    pub interval: Duration,
    /// Bound on fetching a single frame
    pub fetch_timeout: Duration,
    pub matching: MatchConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(10),
            matching: MatchConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Set the polling period (minimum 1 ms)
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn matching(mut self, matching: MatchConfig) -> Self {
        self.matching = matching;
        self
    }
}

/// A camera the worker polls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredCamera {
    pub camera_id: String,
    pub source_uri: String,
}

impl MonitoredCamera {
    pub fn new(camera_id: impl Into<String>, source_uri: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            source_uri: source_uri.into(),
        }
    }
}

/// Fetches a single still frame
pub trait FrameFetcher: Send + Sync {
    fn fetch<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Bytes, SourceError>>;
}

/// Fetches by opening the source and taking its first frame
pub struct SourceFetcher {
    sources: Arc<dyn SourceFactory>,
}

impl SourceFetcher {
    pub fn new(sources: Arc<dyn SourceFactory>) -> Self {
        Self { sources }
    }
}

impl FrameFetcher for SourceFetcher {
    fn fetch<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Bytes, SourceError>> {
        Box::pin(async move {
            let mut source = self.sources.open(uri).await?;
            source.next_frame().await?.ok_or(SourceError::NoFrames)
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("failed to load zones: {0}")]
    Zones(#[source] StoreError),

    #[error("failed to fetch frame: {0}")]
    Fetch(#[from] SourceError),

    #[error("frame fetch timed out after {0:?}")]
    FetchTimeout(Duration),

    #[error("failed to decode frame: {0}")]
    Decode(#[from] CodecError),

    #[error("detection failed: {0}")]
    Detect(#[from] DetectError),

    #[error("failed to commit occupancy: {0}")]
    Commit(#[source] StoreError),
}

/// Result of one successful cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub camera_id: String,
    pub cycle: u64,
    pub detections: usize,
    pub states: Vec<ZoneState>,
}

impl CycleReport {
    pub fn occupied(&self) -> usize {
        self.states.iter().filter(|s| s.occupied).count()
    }
}

pub struct OccupancyWorker {
    config: WorkerConfig,
    fetcher: Arc<dyn FrameFetcher>,
    detector: Arc<dyn Detector>,
    zones: Arc<dyn ZoneSource>,
    sink: Arc<dyn OccupancySink>,
}

impl OccupancyWorker {
    pub fn new(
        config: WorkerConfig,
        fetcher: Arc<dyn FrameFetcher>,
        detector: Arc<dyn Detector>,
        zones: Arc<dyn ZoneSource>,
        sink: Arc<dyn OccupancySink>,
    ) -> Self {
        Self {
            config,
            fetcher,
            detector,
            zones,
            sink,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run a single cycle for one camera
    ///
    /// Detection ids take the form `"<cycle>:<index>"`. Cameras without zones
    /// are skipped without fetching.
    pub async fn run_cycle(
        &self,
        camera: &MonitoredCamera,
        cycle: u64,
    ) -> Result<CycleReport, CycleError> {
        let zones = self
            .zones
            .get_zones(&camera.camera_id)
            .await
            .map_err(CycleError::Zones)?;
        if zones.is_empty() {
            return Ok(CycleReport {
                camera_id: camera.camera_id.clone(),
                cycle,
                detections: 0,
                states: Vec::new(),
            });
        }

        let data = tokio::time::timeout(
            self.config.fetch_timeout,
            self.fetcher.fetch(&camera.source_uri),
        )
        .await
        .map_err(|_| CycleError::FetchTimeout(self.config.fetch_timeout))??;

        let (width, height) = codec::dimensions(&data)?;
        let frame = Frame::new(cycle, data);
        let detections = self.detector.detect(&frame).await?;

        let now = Utc::now();
        let states: Vec<ZoneState> =
            match_zones(&zones, &detections, width, height, &self.config.matching)
                .into_iter()
                .map(|m| ZoneState {
                    occupied: m.is_occupied(),
                    confidence: m.detection.as_ref().map(|d| d.confidence),
                    iou: m.detection.as_ref().map(|d| d.iou),
                    matched_detection_id: m.detection.map(|d| d.id),
                    zone_id: m.zone_id,
                    last_updated: now,
                })
                .collect();

        self.sink
            .update_occupancy(&camera.camera_id, states.clone())
            .await
            .map_err(CycleError::Commit)?;

        Ok(CycleReport {
            camera_id: camera.camera_id.clone(),
            cycle,
            detections: detections.len(),
            states,
        })
    }

    /// Poll one camera forever
    pub async fn run_camera(self: Arc<Self>, camera: MonitoredCamera) {
        let mut ticker = tokio::time::interval(self.config.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycle: u64 = 0;

        loop {
            ticker.tick().await;
            cycle += 1;

            match self.run_cycle(&camera, cycle).await {
                Ok(report) => {
                    tracing::debug!(
                        camera = %camera.camera_id,
                        cycle,
                        detections = report.detections,
                        zones = report.states.len(),
                        occupied = report.occupied(),
                        "Occupancy updated"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        camera = %camera.camera_id,
                        cycle,
                        error = %e,
                        "Occupancy cycle failed"
                    );
                }
            }
        }
    }

    /// Spawn one polling task per camera
    pub fn spawn(self: Arc<Self>, cameras: Vec<MonitoredCamera>) -> WorkerHandle {
        tracing::info!(
            cameras = cameras.len(),
            interval_ms = self.config.interval.as_millis() as u64,
            detector = self.detector.name(),
            "Occupancy worker started"
        );
        let tasks = cameras
            .into_iter()
            .map(|camera| tokio::spawn(Arc::clone(&self).run_camera(camera)))
            .collect();
        WorkerHandle { tasks }
    }
}

/// Handle to the spawned per-camera tasks
#[derive(Debug)]
pub struct WorkerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
