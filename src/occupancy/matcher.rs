//! Zone ↔ detection assignment

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::geometry::{polygon_box_overlap, scale_polygon, Overlap};
use super::types::Zone;
use crate::detect::Detection;

/// How detections may be shared between zones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentPolicy {
    /// Each detection occupies at most one zone
    #[default]
    OneToOne,
    /// A detection occupies every zone it overlaps enough
    Overlapping,
}

/// Score a zone/detection pair is ranked and thresholded by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapMetric {
    /// Intersection over union
    #[default]
    Iou,
    /// Intersection over the detection box area
    IoaDetection,
    /// Intersection over the zone area
    IoaZone,
}

impl OverlapMetric {
    pub fn score(self, overlap: &Overlap) -> f64 {
        match self {
            OverlapMetric::Iou => overlap.iou(),
            OverlapMetric::IoaDetection => overlap.ioa_detection(),
            OverlapMetric::IoaZone => overlap.ioa_zone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchConfig {
    /// Minimum score under `metric` for a pair to count
    pub iou_threshold: f64,
    pub metric: OverlapMetric,
    pub policy: AssignmentPolicy,
    /// Detection classes that count as occupants; empty accepts every class
    pub classes: Vec<String>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            metric: OverlapMetric::Iou,
            policy: AssignmentPolicy::OneToOne,
            classes: ["car", "truck", "bus", "motorcycle"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl MatchConfig {
    pub fn iou_threshold(mut self, threshold: f64) -> Self {
        self.iou_threshold = threshold;
        self
    }

    pub fn metric(mut self, metric: OverlapMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn policy(mut self, policy: AssignmentPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classes = classes.into_iter().map(Into::into).collect();
        self
    }

    fn accepts(&self, class: &str) -> bool {
        self.classes.is_empty() || self.classes.iter().any(|c| c == class)
    }
}

/// Detection assigned to a zone
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedDetection {
    pub index: usize,
    pub id: String,
    pub confidence: f32,
    /// Value of the configured metric
    pub score: f64,
    pub iou: f64,
}

/// Outcome for one zone, in the order zones were given
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneMatch {
    pub zone_id: String,
    pub detection: Option<MatchedDetection>,
}

impl ZoneMatch {
    pub fn is_occupied(&self) -> bool {
        self.detection.is_some()
    }
}

struct Candidate {
    zone: usize,
    detection: usize,
    score: f64,
    iou: f64,
    confidence: f32,
}

/// Strongest overlap first; ties go to confidence, then input order
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.detection.cmp(&b.detection))
        .then_with(|| a.zone.cmp(&b.zone))
}

/// Match detections on a `width`×`height` frame against normalized zones
///
/// Deterministic for identical inputs.
pub fn match_zones(
    zones: &[Zone],
    detections: &[Detection],
    width: u32,
    height: u32,
    config: &MatchConfig,
) -> Vec<ZoneMatch> {
    let mut candidates = Vec::new();
    for (zi, zone) in zones.iter().enumerate() {
        if !zone.is_valid() {
            continue;
        }
        let polygon = scale_polygon(&zone.polygon, width, height);
        for (di, det) in detections.iter().enumerate() {
            if !config.accepts(&det.class) {
                continue;
            }
            let overlap = polygon_box_overlap(&polygon, &det.bbox);
            let score = config.metric.score(&overlap);
            if score >= config.iou_threshold && score > 0.0 {
                candidates.push(Candidate {
                    zone: zi,
                    detection: di,
                    score,
                    iou: overlap.iou(),
                    confidence: det.confidence,
                });
            }
        }
    }
    candidates.sort_by(rank);

    let mut assigned: Vec<Option<&Candidate>> = vec![None; zones.len()];
    let mut claimed = vec![false; detections.len()];
    for candidate in &candidates {
        if assigned[candidate.zone].is_some() {
            continue;
        }
        if config.policy == AssignmentPolicy::OneToOne {
            if claimed[candidate.detection] {
                continue;
            }
            claimed[candidate.detection] = true;
        }
        assigned[candidate.zone] = Some(candidate);
    }

    zones
        .iter()
        .zip(assigned)
        .map(|(zone, candidate)| ZoneMatch {
            zone_id: zone.zone_id.clone(),
            detection: candidate.map(|c| MatchedDetection {
                index: c.detection,
                id: detections[c.detection].id(c.detection),
                confidence: c.confidence,
                score: c.score,
                iou: c.iou,
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BBox;

    fn det(x: f64, y: f64, w: f64, h: f64, class: &str, confidence: f32) -> Detection {
        Detection {
            bbox: BBox::new(x, y, w, h),
            class: class.into(),
            confidence,
            source_frame_seq: 7,
        }
    }

    #[test]
    fn test_single_zone_occupied() {
        let zones = [Zone::rect("cam", "A1", 0.1, 0.1, 0.3, 0.3)];
        let dets = [
            det(800.0, 800.0, 50.0, 50.0, "car", 0.9),
            det(120.0, 120.0, 260.0, 260.0, "car", 0.8),
        ];

        let matches = match_zones(&zones, &dets, 1000, 1000, &MatchConfig::default());

        let matched = matches[0].detection.as_ref().unwrap();
        assert_eq!(matched.index, 1);
        assert_eq!(matched.id, "7:1");
        assert!((matched.iou - 0.7511).abs() < 1e-3);
    }

    #[test]
    fn test_far_detection_leaves_zone_free() {
        let zones = [Zone::rect("cam", "A1", 0.1, 0.1, 0.3, 0.3)];
        let dets = [det(800.0, 800.0, 50.0, 50.0, "car", 0.9)];

        let matches = match_zones(&zones, &dets, 1000, 1000, &MatchConfig::default());
        assert!(!matches[0].is_occupied());
    }

    #[test]
    fn test_class_filter() {
        let zones = [Zone::rect("cam", "A1", 0.0, 0.0, 0.5, 0.5)];
        let dets = [det(0.0, 0.0, 50.0, 50.0, "person", 0.99)];

        let matches = match_zones(&zones, &dets, 100, 100, &MatchConfig::default());
        assert!(!matches[0].is_occupied());

        let any = MatchConfig::default().classes(Vec::<String>::new());
        let matches = match_zones(&zones, &dets, 100, 100, &any);
        assert!(matches[0].is_occupied());
    }

    #[test]
    fn test_one_to_one_vs_overlapping() {
        // Two adjacent zones, one car straddling both (more of it in B)
        let zones = [
            Zone::rect("cam", "A", 0.0, 0.0, 0.5, 1.0),
            Zone::rect("cam", "B", 0.5, 0.0, 0.5, 1.0),
        ];
        let dets = [det(40.0, 0.0, 60.0, 100.0, "car", 0.9)];
        let config = MatchConfig::default().iou_threshold(0.05);

        let matches = match_zones(&zones, &dets, 100, 100, &config);
        assert!(!matches[0].is_occupied());
        assert!(matches[1].is_occupied());

        let config = config.policy(AssignmentPolicy::Overlapping);
        let matches = match_zones(&zones, &dets, 100, 100, &config);
        assert!(matches[0].is_occupied());
        assert!(matches[1].is_occupied());
    }

    #[test]
    fn test_greedy_prefers_best_overlap() {
        let zones = [
            Zone::rect("cam", "A", 0.0, 0.0, 0.5, 0.5),
            Zone::rect("cam", "B", 0.5, 0.0, 0.5, 0.5),
        ];
        // Both cars sit mostly in A; the exact fit wins it and the other barely touches B
        let dets = [
            det(5.0, 0.0, 50.0, 50.0, "car", 0.95),
            det(0.0, 0.0, 50.0, 50.0, "car", 0.6),
        ];

        let matches = match_zones(&zones, &dets, 100, 100, &MatchConfig::default());
        assert_eq!(matches[0].detection.as_ref().unwrap().index, 1);
        assert!(!matches[1].is_occupied());
    }

    #[test]
    fn test_car_in_wide_bay_needs_ioa() {
        // Bay is 0.5 x 0.5 of the frame, the car covers a fifth of it
        let zones = [Zone::rect("cam", "W", 0.0, 0.0, 0.5, 0.5)];
        let dets = [det(10.0, 10.0, 25.0, 20.0, "car", 0.9)];

        let iou = match_zones(&zones, &dets, 100, 100, &MatchConfig::default());
        assert!(!iou[0].is_occupied());

        let config = MatchConfig::default().metric(OverlapMetric::IoaDetection);
        let ioa = match_zones(&zones, &dets, 100, 100, &config);
        let matched = ioa[0].detection.as_ref().unwrap();
        assert!((matched.score - 1.0).abs() < 1e-9);
        assert!((matched.iou - 0.2).abs() < 1e-9);

        // Only a fifth of the bay is covered
        let config = MatchConfig::default().metric(OverlapMetric::IoaZone);
        assert!(!match_zones(&zones, &dets, 100, 100, &config)[0].is_occupied());
    }

    #[test]
    fn test_ioa_zone_counts_a_box_covering_the_bay() {
        let zones = [Zone::rect("cam", "A", 0.0, 0.0, 0.4, 0.4)];
        // The larger box spills far outside the bay but covers all of it
        let dets = [
            det(0.0, 0.0, 100.0, 100.0, "truck", 0.5),
            det(0.0, 0.0, 20.0, 20.0, "car", 0.9),
        ];
        let config = MatchConfig::default().metric(OverlapMetric::IoaZone);

        let matches = match_zones(&zones, &dets, 100, 100, &config);
        assert_eq!(matches[0].detection.as_ref().unwrap().index, 0);

        let matches = match_zones(&zones, &dets, 100, 100, &MatchConfig::default());
        assert!(!matches[0].is_occupied());
    }

    #[test]
    fn test_metric_names() {
        let metric: OverlapMetric = serde_json::from_str("\"ioa_detection\"").unwrap();
        assert_eq!(metric, OverlapMetric::IoaDetection);
        assert_eq!(serde_json::to_string(&OverlapMetric::IoaZone).unwrap(), "\"ioa_zone\"");
    }

    #[test]
    fn test_deterministic() {
        let zones: Vec<Zone> = (0..4)
            .map(|i| Zone::rect("cam", format!("Z{i}"), 0.25 * i as f64, 0.0, 0.25, 1.0))
            .collect();
        let dets: Vec<Detection> = (0..6)
            .map(|i| det(15.0 * i as f64, 10.0, 30.0, 80.0, "car", 0.5))
            .collect();
        let config = MatchConfig::default().iou_threshold(0.05);

        let first = match_zones(&zones, &dets, 100, 100, &config);
        let second = match_zones(&zones, &dets, 100, 100, &config);
        assert_eq!(first, second);
    }
}
