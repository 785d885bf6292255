//! Crate-level error type and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::config::ConfigError;
use crate::detect::DetectError;
use crate::occupancy::StoreError;
use crate::registry::RegistryError;
use crate::session::SessionConfigError;
use crate::source::SourceError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Too many concurrent viewers
    #[error("Over capacity: {0}")]
    OverCapacity(String),

    #[error(transparent)]
    SessionConfig(#[from] SessionConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Detector error: {0}")]
    Detect(#[from] DetectError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::SessionConfig(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::OverCapacity(_) => (StatusCode::SERVICE_UNAVAILABLE, "OVER_CAPACITY"),
            Error::Registry(RegistryError::DetectorUnavailable) => {
                (StatusCode::SERVICE_UNAVAILABLE, "DETECTOR_UNAVAILABLE")
            }
            Error::Registry(RegistryError::StreamTerminated(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STREAM_UNAVAILABLE")
            }
            Error::Registry(RegistryError::ShuttingDown) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN")
            }
            Error::Source(_) => (StatusCode::BAD_GATEWAY, "SOURCE_ERROR"),
            Error::Detect(_) => (StatusCode::BAD_GATEWAY, "DETECTOR_ERROR"),
            Error::Store(StoreError::UnknownCamera(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = %status, error_code, message = %message, "Request error");
        } else {
            tracing::debug!(status = %status, error_code, message = %message, "Request rejected");
        }

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
