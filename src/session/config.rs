//! Per-session configuration captured at connect time

use std::time::Duration;

use serde::Deserialize;

use crate::detect::AnnotationParams;
use crate::registry::{Pipeline, StreamKey};

/// Shortest period accepted for periodic timers
pub(crate) const MIN_TICK: Duration = Duration::from_millis(1);

/// Raw query parameters of a viewer request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamQuery {
    pub conf: Option<f32>,
    pub fps: Option<u32>,
    pub skip_frames: Option<u32>,
    #[serde(alias = "show_labels")]
    pub labels: Option<bool>,
}

/// What the viewer asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Frames as read from the camera
    Raw,
    /// Frames with detection overlays
    Detect,
}

/// Defaults and bounds applied to viewer queries
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub conf: f32,
    pub detect_fps: u32,
    pub raw_fps: u32,
    pub skip_frames: u32,
    pub labels: bool,
    pub max_fps: u32,
    pub max_skip_frames: u32,
    /// Period between stats messages
    pub stats_interval: Duration,
    /// Longest a single write may take before the viewer is dropped
    pub write_timeout: Duration,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            conf: 0.25,
            detect_fps: 10,
            raw_fps: 30,
            skip_frames: 2,
            labels: true,
            max_fps: 30,
            max_skip_frames: 10,
            stats_interval: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl SessionDefaults {
    /// Set the stats message period (minimum 1 ms)
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval.max(MIN_TICK);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Rejected query parameter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionConfigError {
    #[error("conf must be within [0, 1], got {0}")]
    Conf(f32),

    #[error("fps must be within [1, {max}], got {value}")]
    Fps { value: u32, max: u32 },

    #[error("skip_frames must be within [1, {max}], got {value}")]
    SkipFrames { value: u32, max: u32 },
}

/// Immutable per-session parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub mode: SessionMode,
    pub conf: f32,
    pub fps: u32,
    pub skip_frames: u32,
    pub labels: bool,
    pub stats_interval: Duration,
    pub write_timeout: Duration,
}

impl SessionConfig {
    /// Validate a query against the bounds and fill in defaults
    pub fn from_query(
        mode: SessionMode,
        query: &StreamQuery,
        defaults: &SessionDefaults,
    ) -> Result<Self, SessionConfigError> {
        let conf = query.conf.unwrap_or(defaults.conf);
        if !(0.0..=1.0).contains(&conf) {
            return Err(SessionConfigError::Conf(conf));
        }

        let default_fps = match mode {
            SessionMode::Raw => defaults.raw_fps,
            SessionMode::Detect => defaults.detect_fps,
        };
        let fps = query.fps.unwrap_or(default_fps);
        if fps == 0 || fps > defaults.max_fps {
            return Err(SessionConfigError::Fps {
                value: fps,
                max: defaults.max_fps,
            });
        }

        let skip_frames = query.skip_frames.unwrap_or(defaults.skip_frames);
        if skip_frames == 0 || skip_frames > defaults.max_skip_frames {
            return Err(SessionConfigError::SkipFrames {
                value: skip_frames,
                max: defaults.max_skip_frames,
            });
        }

        Ok(Self {
            mode,
            conf,
            fps,
            skip_frames,
            labels: query.labels.unwrap_or(defaults.labels),
            stats_interval: defaults.stats_interval,
            write_timeout: defaults.write_timeout,
        })
    }

    /// Pipeline serving this session
    pub fn pipeline(&self) -> Pipeline {
        match self.mode {
            SessionMode::Raw => Pipeline::Raw,
            SessionMode::Detect => Pipeline::Annotated(AnnotationParams::new(
                self.conf,
                self.fps,
                self.skip_frames,
                self.labels,
            )),
        }
    }

    pub fn stream_key(&self, source: impl Into<String>) -> StreamKey {
        StreamKey {
            source: source.into(),
            pipeline: self.pipeline(),
        }
    }

    /// Minimum spacing between frames sent to the viewer
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }
}
