//! HTTP inference server client

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::{BBox, DetectError, Detection, Detector};
use crate::registry::Frame;

/// Posts frames to an inference server at `{base_url}/v1/detect`
///
/// The request is a multipart form with the JPEG under `image`. The server
/// answers with `{"detections": [{"bbox": [x, y, w, h], "class": "car",
/// "confidence": 0.91}, ...]}` in pixel coordinates.
pub struct HttpDetector {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<WireDetection>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    bbox: [f64; 4],
    class: String,
    confidence: f32,
}

impl HttpDetector {
    /// Create a client with a per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DetectError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, frame: &Frame) -> Result<Vec<Detection>, DetectError> {
        let url = format!("{}/v1/detect", self.base_url);

        let form = Form::new()
            .part(
                "image",
                Part::bytes(frame.data.to_vec())
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")?,
            )
            .text("seq", frame.seq.to_string());

        let response = self.client.post(&url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DetectError::Status(status.as_u16()));
        }

        let body: DetectResponse = response
            .json()
            .await
            .map_err(|e| DetectError::InvalidResponse(e.to_string()))?;

        Ok(into_detections(body, frame.seq))
    }
}

fn into_detections(body: DetectResponse, seq: u64) -> Vec<Detection> {
    body.detections
        .into_iter()
        .map(|d| Detection {
            bbox: BBox::new(d.bbox[0], d.bbox[1], d.bbox[2], d.bbox[3]),
            class: d.class,
            confidence: d.confidence,
            source_frame_seq: seq,
        })
        .collect()
}

impl Detector for HttpDetector {
    fn name(&self) -> &str {
        "http"
    }

    fn detect<'a>(&'a self, frame: &'a Frame) -> BoxFuture<'a, Result<Vec<Detection>, DetectError>> {
        Box::pin(self.post(frame))
    }
}
