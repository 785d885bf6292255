//! Frame and stream key types for fan-out routing
//!
//! This module defines the key types for identifying broadcasters and the
//! frames that are published to subscribers.

use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Instant;

use crate::detect::{AnnotationParams, Detection};

/// Unique identifier for a broadcaster (source URI + pipeline)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    /// Upstream source URI (e.g., "http://192.168.1.50/stream")
    pub source: String,
    /// Which pipeline this broadcaster carries
    pub pipeline: Pipeline,
}

/// Pipeline attached to a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pipeline {
    /// Frames exactly as read from the source
    Raw,
    /// Frames passed through a detection annotator with these parameters
    Annotated(AnnotationParams),
}

impl StreamKey {
    /// Key for the raw broadcaster of a source
    pub fn raw(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            pipeline: Pipeline::Raw,
        }
    }

    /// Key for an annotated broadcaster of a source
    pub fn annotated(source: impl Into<String>, params: AnnotationParams) -> Self {
        Self {
            source: source.into(),
            pipeline: Pipeline::Annotated(params),
        }
    }

    /// The raw key for the same source
    pub fn to_raw(&self) -> Self {
        Self::raw(self.source.clone())
    }

    pub fn is_raw(&self) -> bool {
        self.pipeline == Pipeline::Raw
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.pipeline {
            Pipeline::Raw => write!(f, "{}", self.source),
            Pipeline::Annotated(params) => write!(f, "{}#{}", self.source, params),
        }
    }
}

/// A frame to be published to subscribers
///
/// Cheap to clone: the payload is a reference-counted `Bytes` and the
/// detections are behind an `Arc`. Never mutated after publish.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic sequence number assigned by the source reader
    pub seq: u64,
    /// When the frame was read from the source
    pub captured_at: Instant,
    /// Encoded image (JPEG)
    pub data: Bytes,
    /// Detections attached by an annotator
    pub detections: Option<Arc<[Detection]>>,
}

impl Frame {
    /// Create a raw frame captured now
    pub fn new(seq: u64, data: Bytes) -> Self {
        Self {
            seq,
            captured_at: Instant::now(),
            data,
            detections: None,
        }
    }

    /// Derive an annotated frame, keeping the sequence number and capture time
    pub fn annotated(&self, data: Bytes, detections: Vec<Detection>) -> Self {
        Self {
            seq: self.seq,
            captured_at: self.captured_at,
            data,
            detections: Some(detections.into()),
        }
    }

    /// Size of the encoded payload in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_annotated(&self) -> bool {
        self.detections.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_key_display() {
        let raw = StreamKey::raw("http://cam/stream");
        assert_eq!(raw.to_string(), "http://cam/stream");

        let params = AnnotationParams::new(0.25, 10, 2, true);
        let annotated = StreamKey::annotated("http://cam/stream", params);
        assert_eq!(
            annotated.to_string(),
            "http://cam/stream#detect(conf=0.250,fps=10,skip=2,labels=true)"
        );
        assert_eq!(annotated.to_raw(), raw);
        assert!(!annotated.is_raw());
    }

    #[test]
    fn test_annotated_frame_keeps_identity() {
        let frame = Frame::new(7, Bytes::from_static(b"raw"));
        let annotated = frame.annotated(Bytes::from_static(b"boxes"), Vec::new());

        assert_eq!(annotated.seq, 7);
        assert_eq!(annotated.captured_at, frame.captured_at);
        assert!(annotated.is_annotated());
        assert!(!frame.is_annotated());
        assert_eq!(annotated.size(), 5);
    }
}
