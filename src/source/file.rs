//! Local MJPEG/JPEG file played back in a loop

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::time::{Interval, MissedTickBehavior};

use super::{FrameSource, SourceError};
use crate::codec::JpegSplitter;

/// Replays the frames of a file forever at a fixed rate
pub struct FileSource {
    frames: Vec<Bytes>,
    position: usize,
    ticker: Interval,
}

impl FileSource {
    pub async fn open(path: &Path, fps: u32, max_frame_bytes: usize) -> Result<Self, SourceError> {
        let data = tokio::fs::read(path).await?;
        Self::from_bytes(&data, fps, max_frame_bytes)
    }

    /// Split an in-memory MJPEG buffer
    pub fn from_bytes(data: &[u8], fps: u32, max_frame_bytes: usize) -> Result<Self, SourceError> {
        let mut splitter = JpegSplitter::new(max_frame_bytes);
        splitter.push(data);

        let mut frames = Vec::new();
        while let Some(frame) = splitter.next_frame() {
            frames.push(frame);
        }
        if frames.is_empty() {
            return Err(SourceError::NoFrames);
        }

        let period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Ok(Self {
            frames,
            position: 0,
            ticker,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    async fn read_frame(&mut self) -> Result<Option<Bytes>, SourceError> {
        self.ticker.tick().await;
        let frame = self.frames[self.position].clone();
        self.position = (self.position + 1) % self.frames.len();
        Ok(Some(frame))
    }
}

impl FrameSource for FileSource {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<Bytes>, SourceError>> {
        Box::pin(self.read_frame())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::codec::{encode_solid, DEFAULT_MAX_FRAME_BYTES};

    #[tokio::test(start_paused = true)]
    async fn test_file_source_loops() {
        let a = encode_solid(8, 8, [255, 0, 0], 75).unwrap();
        let b = encode_solid(8, 8, [0, 0, 255], 75).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&a).unwrap();
        file.write_all(b"\r\n--frame\r\n").unwrap();
        file.write_all(&b).unwrap();
        file.flush().unwrap();

        let mut source = FileSource::open(file.path(), 10, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();
        assert_eq!(source.frame_count(), 2);

        let first = source.next_frame().await.unwrap().unwrap();
        let second = source.next_frame().await.unwrap().unwrap();
        let third = source.next_frame().await.unwrap().unwrap();
        assert_eq!(first, a);
        assert_eq!(second, b);
        assert_eq!(third, a);
    }

    #[tokio::test]
    async fn test_empty_file_rejected() {
        let result = FileSource::from_bytes(b"not a jpeg", 10, DEFAULT_MAX_FRAME_BYTES);
        assert!(matches!(result, Err(SourceError::NoFrames)));
    }
}
