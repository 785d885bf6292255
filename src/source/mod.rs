//! Upstream camera sources
//!
//! A [`FrameSource`] yields encoded frames from one connection to a camera.
//! A [`SourceFactory`] opens a fresh connection for a URI; the
//! [`SourceReader`](reader::SourceReader) calls it again after every failure.

pub mod file;
pub mod mjpeg;
pub mod reader;

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

pub use file::FileSource;
pub use mjpeg::MjpegHttpSource;
pub use reader::{ReaderConfig, ReaderExit, ReaderHandle, SourceReader};

use crate::codec::DEFAULT_MAX_FRAME_BYTES;

/// One open connection to an upstream camera
pub trait FrameSource: Send {
    /// Next encoded frame; `Ok(None)` signals end of stream
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<Bytes>, SourceError>>;
}

/// Opens connections to upstream URIs
pub trait SourceFactory: Send + Sync {
    fn open<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Box<dyn FrameSource>, SourceError>>;
}

/// Errors from upstream sources
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no frame within {0:?}")]
    Timeout(Duration),

    #[error("unsupported source URI: {0}")]
    UnsupportedUri(String),

    #[error("source contains no frames")]
    NoFrames,
}

/// Tuning shared by the built-in sources
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Scan buffer limit before garbage is discarded
    pub max_frame_bytes: usize,
    /// Maximum wait for the next frame on an open connection
    pub read_timeout: Duration,
    /// TCP connect timeout for HTTP sources
    pub connect_timeout: Duration,
    /// Playback rate for file sources
    pub file_fps: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            read_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            file_fps: 15,
        }
    }
}

/// Where a URI points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Http(String),
    File(PathBuf),
}

impl SourceLocation {
    pub fn parse(uri: &str) -> Result<Self, SourceError> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            Ok(SourceLocation::Http(uri.to_string()))
        } else if let Some(path) = uri.strip_prefix("file://") {
            Ok(SourceLocation::File(PathBuf::from(path)))
        } else if !uri.is_empty() && !uri.contains("://") {
            Ok(SourceLocation::File(PathBuf::from(uri)))
        } else {
            Err(SourceError::UnsupportedUri(uri.to_string()))
        }
    }
}

/// Factory for `http(s)://` MJPEG streams and local files
pub struct DefaultSourceFactory {
    client: reqwest::Client,
    config: SourceConfig,
}

impl DefaultSourceFactory {
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        // No overall timeout: the stream body is unbounded
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    async fn open_location(&self, uri: &str) -> Result<Box<dyn FrameSource>, SourceError> {
        match SourceLocation::parse(uri)? {
            SourceLocation::Http(url) => {
                let source = MjpegHttpSource::connect(&self.client, &url, &self.config).await?;
                Ok(Box::new(source))
            }
            SourceLocation::File(path) => {
                let source = FileSource::open(&path, self.config.file_fps, self.config.max_frame_bytes).await?;
                Ok(Box::new(source))
            }
        }
    }
}

impl SourceFactory for DefaultSourceFactory {
    fn open<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Box<dyn FrameSource>, SourceError>> {
        Box::pin(self.open_location(uri))
    }
}
