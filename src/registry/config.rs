//! Broadcast manager configuration

use std::time::Duration;

use crate::detect::AnnotatorConfig;
use crate::source::ReaderConfig;

/// Configuration for the broadcast manager
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Per-subscriber queue capacity (frames)
    pub queue_capacity: usize,

    /// How long a broadcaster with no subscribers is kept before teardown
    pub grace_period: Duration,

    /// Period of the background sweep
    pub cleanup_interval: Duration,

    /// Reconnect policy for source readers
    pub reader: ReaderConfig,

    /// Tuning for annotated pipelines
    pub annotator: AnnotatorConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            grace_period: Duration::from_secs(3),
            cleanup_interval: Duration::from_secs(1),
            reader: ReaderConfig::default(),
            annotator: AnnotatorConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Set the subscriber queue capacity (minimum 1)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn grace_period(mut self, period: Duration) -> Self {
        self.grace_period = period;
        self
    }

    /// Set the reaper sweep period (minimum 1 ms)
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn reader(mut self, reader: ReaderConfig) -> Self {
        self.reader = reader;
        self
    }

    pub fn annotator(mut self, annotator: AnnotatorConfig) -> Self {
        self.annotator = annotator;
        self
    }
}
