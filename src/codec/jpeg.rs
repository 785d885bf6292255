//! JPEG frame boundary scanning and probing

use std::io::Cursor;

use bytes::{Buf, Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use super::CodecError;

/// Start-of-image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];
/// End-of-image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound for a single buffered frame (5 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 5 * 1024 * 1024;

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

/// Locate the first complete `SOI .. EOI` span in `buffer`
pub fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = find_marker(buffer, SOI)?;
    let body = start + SOI.len();
    let end = find_marker(&buffer[body..], EOI)?;
    Some((start, body + end + EOI.len()))
}

/// Incremental splitter for a concatenated JPEG byte stream
///
/// Works on raw MJPEG bodies regardless of multipart boundaries or headers:
/// anything outside `SOI .. EOI` is discarded.
#[derive(Debug)]
pub struct JpegSplitter {
    buffer: BytesMut,
    max_frame_bytes: usize,
    overflows: u64,
}

impl JpegSplitter {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            max_frame_bytes,
            overflows: 0,
        }
    }

    /// Append bytes read from upstream
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extract the next complete frame, if any
    pub fn next_frame(&mut self) -> Option<Bytes> {
        if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
            self.buffer.advance(start);
            return Some(self.buffer.split_to(end - start).freeze());
        }

        match find_marker(&self.buffer, SOI) {
            // Drop leading garbage before the frame in progress
            Some(start) if start > 0 => self.buffer.advance(start),
            Some(_) => {}
            None => {
                // Keep a trailing 0xFF, it may begin a marker split across reads
                let keep = usize::from(self.buffer.last() == Some(&0xFF));
                let drop = self.buffer.len() - keep;
                self.buffer.advance(drop);
            }
        }

        if self.buffer.len() > self.max_frame_bytes {
            tracing::warn!(
                buffered = self.buffer.len(),
                max = self.max_frame_bytes,
                "JPEG scan buffer overflow, discarding"
            );
            self.buffer.clear();
            self.overflows += 1;
        }
        None
    }

    /// Bytes waiting for a frame boundary
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Times the buffer was discarded for exceeding the frame limit
    pub fn overflows(&self) -> u64 {
        self.overflows
    }
}

/// Read image dimensions from the header without decoding pixels
pub fn dimensions(data: &[u8]) -> Result<(u32, u32), CodecError> {
    image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .into_dimensions()
        .map_err(CodecError::Decode)
}

/// Encode a single-colour JPEG; used for placeholders and synthetic cameras
pub fn encode_solid(width: u32, height: u32, rgb: [u8; 3], quality: u8) -> Result<Bytes, CodecError> {
    let image = RgbImage::from_pixel(width.max(1), height.max(1), Rgb(rgb));
    encode_rgb(&image, quality)
}

/// Encode an RGB buffer as JPEG at `quality` (1..=100)
pub fn encode_rgb(image: &RgbImage, quality: u8) -> Result<Bytes, CodecError> {
    let mut out = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(CodecError::Encode)?;
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = SOI.to_vec();
        v.extend_from_slice(body);
        v.extend_from_slice(&EOI);
        v
    }

    #[test]
    fn test_find_bounds() {
        let mut buf = b"--boundary\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        let offset = buf.len();
        buf.extend(fake_jpeg(b"abc"));
        buf.extend_from_slice(b"\r\n--boundary");

        assert_eq!(find_jpeg_bounds(&buf), Some((offset, offset + 7)));
        assert_eq!(find_jpeg_bounds(b"no markers here"), None);
    }

    #[test]
    fn test_splitter_handles_split_reads() {
        let stream = [
            b"junk".to_vec(),
            fake_jpeg(b"one"),
            b"\r\n--b\r\n".to_vec(),
            fake_jpeg(b"two"),
        ]
        .concat();

        let mut splitter = JpegSplitter::new(DEFAULT_MAX_FRAME_BYTES);
        let mut frames = Vec::new();
        for chunk in stream.chunks(3) {
            splitter.push(chunk);
            while let Some(frame) = splitter.next_frame() {
                frames.push(frame);
            }
        }

        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], &fake_jpeg(b"one")[..]);
        assert_eq!(&frames[1][..], &fake_jpeg(b"two")[..]);
    }

    #[test]
    fn test_splitter_discards_oversized_frame() {
        let mut splitter = JpegSplitter::new(16);
        splitter.push(&SOI);
        splitter.push(&[0u8; 32]);

        assert!(splitter.next_frame().is_none());
        assert_eq!(splitter.buffered(), 0);
        assert_eq!(splitter.overflows(), 1);

        // Recovers on the next well-formed frame
        splitter.push(&fake_jpeg(b"ok"));
        assert!(splitter.next_frame().is_some());
    }

    #[test]
    fn test_splitter_keeps_partial_marker() {
        let mut splitter = JpegSplitter::new(DEFAULT_MAX_FRAME_BYTES);
        splitter.push(b"garbage\xFF");
        assert!(splitter.next_frame().is_none());
        assert_eq!(splitter.buffered(), 1);

        splitter.push(b"\xD8body\xFF\xD9");
        assert_eq!(splitter.next_frame().unwrap().len(), 8);
    }

    #[test]
    fn test_encode_and_probe_dimensions() {
        let jpeg = encode_solid(64, 48, [10, 200, 30], 75).unwrap();
        assert_eq!(&jpeg[..2], &SOI);
        assert_eq!(dimensions(&jpeg).unwrap(), (64, 48));
        assert!(dimensions(b"not an image").is_err());
    }
}
