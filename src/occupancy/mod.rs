//! Zone occupancy
//!
//! Cameras watching a parking area get a set of polygonal zones. The
//! [`OccupancyWorker`] periodically samples a frame per camera, runs the
//! detector and decides which zones hold a vehicle.

pub mod geometry;
pub mod matcher;
pub mod store;
pub mod types;
pub mod worker;

pub use geometry::Overlap;
pub use matcher::{
    match_zones, AssignmentPolicy, MatchConfig, MatchedDetection, OverlapMetric, ZoneMatch,
};
pub use store::{MemoryStore, OccupancySink, StoreError, ZoneSource};
pub use types::{OccupancySummary, Point, Zone, ZoneState};
pub use worker::{
    CycleError, CycleReport, FrameFetcher, MonitoredCamera, OccupancyWorker, SourceFetcher,
    WorkerConfig, WorkerHandle,
};
