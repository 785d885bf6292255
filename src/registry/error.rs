//! Registry error types
//!
//! Error types for broadcast manager operations.

use super::frame::StreamKey;

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// The broadcaster ended before the subscriber could attach
    #[error("Stream terminated: {0}")]
    StreamTerminated(StreamKey),
    /// An annotated stream was requested but no detector is configured
    #[error("No detector configured")]
    DetectorUnavailable,
    /// The manager is shutting down
    #[error("Server is shutting down")]
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = RegistryError::StreamTerminated(StreamKey::raw("http://cam/stream"));
        assert_eq!(err.to_string(), "Stream terminated: http://cam/stream");
        assert_eq!(
            RegistryError::DetectorUnavailable.to_string(),
            "No detector configured"
        );

        let boxed: Box<dyn std::error::Error> = Box::new(RegistryError::ShuttingDown);
        assert_eq!(boxed.to_string(), "Server is shutting down");
    }
}
