//! Viewer sessions
//!
//! A session captures its parameters at connect time, subscribes to the
//! matching pipeline and forwards frames to a [`Transport`] until either side
//! goes away.

pub mod config;
pub mod message;
pub mod stream;

pub use config::{SessionConfig, SessionConfigError, SessionDefaults, SessionMode, StreamQuery};
pub use message::{DetectionView, ViewerMessage};
pub use stream::{SessionEnd, SessionSummary, StreamSession, Transport, TransportError};
