//! Object detection backends and the detection annotator stage
//!
//! A [`Detector`] turns one encoded frame into a list of [`Detection`]s. The
//! [`DetectionAnnotator`](annotator::DetectionAnnotator) sits between a raw
//! broadcaster and an annotated one, pacing model calls independently of the
//! source frame rate.

pub mod annotator;
pub mod http;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use annotator::{AnnotationParams, AnnotatorConfig, AnnotatorExit, DetectionAnnotator};
pub use http::HttpDetector;

use crate::registry::Frame;

/// Axis-aligned bounding box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// One detected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    /// Class label reported by the model (e.g. "car")
    pub class: String,
    pub confidence: f32,
    /// Sequence number of the frame the detection came from
    pub source_frame_seq: u64,
}

impl Detection {
    /// Stable identifier: `"<seq>:<index>"`
    pub fn id(&self, index: usize) -> String {
        format!("{}:{}", self.source_frame_seq, index)
    }
}

/// Detection model seam
pub trait Detector: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Run the model on one encoded frame
    fn detect<'a>(&'a self, frame: &'a Frame) -> BoxFuture<'a, Result<Vec<Detection>, DetectError>>;
}

/// Errors raised by detection backends
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("detector request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("detector returned HTTP {0}")]
    Status(u16),

    #[error("invalid detector response: {0}")]
    InvalidResponse(String),

    #[error("detector unavailable: {0}")]
    Unavailable(String),
}
