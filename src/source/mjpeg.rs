//! MJPEG over HTTP (multipart/x-mixed-replace)

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;

use super::{FrameSource, SourceConfig, SourceError};
use crate::codec::JpegSplitter;

/// Reads frames from an MJPEG HTTP response body
pub struct MjpegHttpSource {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    splitter: JpegSplitter,
    read_timeout: Duration,
}

impl MjpegHttpSource {
    /// Issue the request and check the status; frames are read lazily
    pub async fn connect(
        client: &reqwest::Client,
        url: &str,
        config: &SourceConfig,
    ) -> Result<Self, SourceError> {
        let response = tokio::time::timeout(config.read_timeout, client.get(url).send())
            .await
            .map_err(|_| SourceError::Timeout(config.read_timeout))??;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        tracing::debug!(
            url = %url,
            content_type = ?response.headers().get(reqwest::header::CONTENT_TYPE),
            "MJPEG source connected"
        );

        Ok(Self {
            body: response.bytes_stream().boxed(),
            splitter: JpegSplitter::new(config.max_frame_bytes),
            read_timeout: config.read_timeout,
        })
    }

    async fn read_frame(&mut self) -> Result<Option<Bytes>, SourceError> {
        loop {
            if let Some(frame) = self.splitter.next_frame() {
                return Ok(Some(frame));
            }

            let chunk = tokio::time::timeout(self.read_timeout, self.body.next())
                .await
                .map_err(|_| SourceError::Timeout(self.read_timeout))?;

            match chunk {
                Some(chunk) => self.splitter.push(&chunk?),
                None => return Ok(None),
            }
        }
    }
}

impl FrameSource for MjpegHttpSource {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<Bytes>, SourceError>> {
        Box::pin(self.read_frame())
    }
}
