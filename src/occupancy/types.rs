//! Zone and occupancy data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Polygon vertex; normalized (0..1) in zone definitions, pixels after scaling
///
/// Serialized as a `[x, y]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// A monitored region of a camera image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub camera_id: String,
    pub zone_id: String,
    /// Vertices in normalized image coordinates
    pub polygon: Vec<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Zone {
    /// Axis-aligned zone from normalized `x, y, width, height`
    pub fn rect(
        camera_id: impl Into<String>,
        zone_id: impl Into<String>,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            zone_id: zone_id.into(),
            polygon: vec![
                Point::new(x, y),
                Point::new(x + width, y),
                Point::new(x + width, y + height),
                Point::new(x, y + height),
            ],
            label: None,
        }
    }

    /// A usable polygon has at least three vertices
    pub fn is_valid(&self) -> bool {
        self.polygon.len() >= 3
    }
}

/// Occupancy of one zone as of one worker cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneState {
    pub zone_id: String,
    pub occupied: bool,
    /// Confidence of the matched detection
    pub confidence: Option<f32>,
    /// Overlap between zone and matched detection
    pub iou: Option<f64>,
    pub last_updated: DateTime<Utc>,
    /// `"<seq>:<index>"` of the matched detection
    pub matched_detection_id: Option<String>,
}

/// Aggregate occupancy for a camera
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupancySummary {
    pub total: usize,
    pub occupied: usize,
    pub available: usize,
    /// Fraction of zones occupied, 0..1
    pub occupancy_rate: f64,
}

impl OccupancySummary {
    pub fn new(total: usize, occupied: usize) -> Self {
        let occupied = occupied.min(total);
        Self {
            total,
            occupied,
            available: total - occupied,
            occupancy_rate: if total > 0 {
                occupied as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}
