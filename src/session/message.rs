//! JSON messages sent to viewers

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::detect::Detection;
use crate::registry::Frame;

/// Message written to a viewer connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerMessage {
    /// One encoded frame, base64 in `data`
    Frame {
        seq: u64,
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detections: Option<Vec<DetectionView>>,
    },
    /// Periodic delivery statistics
    Stats { processed: u64, skipped: u64, fps: f64 },
    /// Terminal error; the connection closes after it
    Error { message: String },
}

/// Detection as presented to viewers
///
/// This is where clients get class names and confidences for label text;
/// rendered frames only carry a colored confidence tab per box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionView {
    pub id: String,
    pub class: String,
    pub confidence: f32,
    /// `[x, y, width, height]` in pixels
    pub bbox: [f64; 4],
}

impl DetectionView {
    fn from_detection(index: usize, detection: &Detection) -> Self {
        let b = &detection.bbox;
        Self {
            id: detection.id(index),
            class: detection.class.clone(),
            confidence: detection.confidence,
            bbox: [b.x, b.y, b.width, b.height],
        }
    }
}

impl ViewerMessage {
    pub fn frame(frame: &Frame) -> Self {
        ViewerMessage::Frame {
            seq: frame.seq,
            data: STANDARD.encode(&frame.data),
            detections: frame.detections.as_ref().map(|dets| {
                dets.iter()
                    .enumerate()
                    .map(|(i, d)| DetectionView::from_detection(i, d))
                    .collect()
            }),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ViewerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
