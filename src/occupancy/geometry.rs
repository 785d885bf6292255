//! Polygon/box overlap

use super::types::Point;
use crate::detect::BBox;

/// Area of a simple polygon (shoelace formula)
pub fn polygon_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: f64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x * b.y - b.x * a.y)
        .sum();
    twice.abs() / 2.0
}

#[derive(Debug, Clone, Copy)]
enum Edge {
    Left(f64),
    Right(f64),
    Top(f64),
    Bottom(f64),
}

impl Edge {
    fn inside(&self, p: Point) -> bool {
        match *self {
            Edge::Left(x) => p.x >= x,
            Edge::Right(x) => p.x <= x,
            Edge::Top(y) => p.y >= y,
            Edge::Bottom(y) => p.y <= y,
        }
    }

    /// Where segment `a -> b` crosses this edge
    fn intersect(&self, a: Point, b: Point) -> Point {
        match *self {
            Edge::Left(x) | Edge::Right(x) => {
                let t = (x - a.x) / (b.x - a.x);
                Point::new(x, a.y + t * (b.y - a.y))
            }
            Edge::Top(y) | Edge::Bottom(y) => {
                let t = (y - a.y) / (b.y - a.y);
                Point::new(a.x + t * (b.x - a.x), y)
            }
        }
    }
}

/// Clip a polygon to an axis-aligned box (Sutherland–Hodgman)
pub fn clip_to_rect(polygon: &[Point], bbox: &BBox) -> Vec<Point> {
    let edges = [
        Edge::Left(bbox.x),
        Edge::Right(bbox.right()),
        Edge::Top(bbox.y),
        Edge::Bottom(bbox.bottom()),
    ];

    let mut output = polygon.to_vec();
    for edge in edges {
        if output.is_empty() {
            break;
        }
        let input = std::mem::take(&mut output);
        let mut prev = input[input.len() - 1];
        for &current in &input {
            match (edge.inside(prev), edge.inside(current)) {
                (true, true) => output.push(current),
                (true, false) => output.push(edge.intersect(prev, current)),
                (false, true) => {
                    output.push(edge.intersect(prev, current));
                    output.push(current);
                }
                (false, false) => {}
            }
            prev = current;
        }
    }
    output
}

/// Areas of a zone polygon, a box and their intersection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlap {
    pub intersection: f64,
    pub zone_area: f64,
    pub box_area: f64,
}

impl Overlap {
    /// Intersection over union
    pub fn iou(&self) -> f64 {
        let union = self.zone_area + self.box_area - self.intersection;
        ratio(self.intersection, union)
    }

    /// Share of the box that lies inside the zone
    pub fn ioa_detection(&self) -> f64 {
        ratio(self.intersection, self.box_area)
    }

    /// Share of the zone covered by the box
    pub fn ioa_zone(&self) -> f64 {
        ratio(self.intersection, self.zone_area)
    }
}

fn ratio(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        0.0
    } else {
        (part / whole).clamp(0.0, 1.0)
    }
}

/// Overlap between a pixel-space polygon and a box
pub fn polygon_box_overlap(polygon: &[Point], bbox: &BBox) -> Overlap {
    let zone_area = polygon_area(polygon);
    let box_area = bbox.area();
    let intersection = if zone_area <= 0.0 || box_area <= 0.0 {
        0.0
    } else {
        polygon_area(&clip_to_rect(polygon, bbox))
    };
    Overlap {
        intersection,
        zone_area,
        box_area,
    }
}

/// Intersection over union of a pixel-space polygon and a box
pub fn polygon_box_iou(polygon: &[Point], bbox: &BBox) -> f64 {
    polygon_box_overlap(polygon, bbox).iou()
}

/// Map normalized vertices to pixel coordinates
pub fn scale_polygon(polygon: &[Point], width: u32, height: u32) -> Vec<Point> {
    let (w, h) = (f64::from(width), f64::from(height));
    polygon.iter().map(|p| Point::new(p.x * w, p.y * h)).collect()
}
