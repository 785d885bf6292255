//! JPEG handling: stream splitting, probing and annotation rendering

pub mod jpeg;
pub mod render;

pub use jpeg::{dimensions, encode_solid, JpegSplitter, DEFAULT_MAX_FRAME_BYTES};
pub use render::render_detections;

/// Image codec errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to decode image: {0}")]
    Decode(image::ImageError),

    #[error("failed to encode image: {0}")]
    Encode(image::ImageError),

    #[error("failed to read image header: {0}")]
    Io(#[from] std::io::Error),
}
