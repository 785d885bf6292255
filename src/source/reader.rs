//! Source reader: one task per upstream, publishing into a broadcaster

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::SourceFactory;
use crate::broadcast::{Broadcaster, StreamEnd};
use crate::registry::Frame;

/// Reconnect policy
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Consecutive failures tolerated before the source is declared unavailable
    pub max_retries: u32,

    /// Delay before the first reconnect
    pub initial_backoff: Duration,

    /// Upper bound for the doubling backoff
    pub max_backoff: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl ReaderConfig {
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Delay after the `attempt`-th consecutive failure (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    /// Longest time from first failure to giving up
    pub fn give_up_after(&self) -> Duration {
        (1..=self.max_retries).map(|n| self.backoff(n)).sum()
    }
}

/// Why a reader stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    /// Retries exhausted; the broadcaster was terminated with this reason
    SourceUnavailable { reason: String },
    /// The broadcaster was terminated by someone else
    BroadcasterClosed,
}

/// Reads one upstream and publishes each frame, reconnecting on failure
pub struct SourceReader {
    uri: String,
    factory: Arc<dyn SourceFactory>,
    broadcaster: Arc<Broadcaster>,
    config: ReaderConfig,
}

impl SourceReader {
    pub fn new(
        uri: impl Into<String>,
        factory: Arc<dyn SourceFactory>,
        broadcaster: Arc<Broadcaster>,
        config: ReaderConfig,
    ) -> Self {
        Self {
            uri: uri.into(),
            factory,
            broadcaster,
            config,
        }
    }

    /// Spawn the reader on the runtime
    pub fn start(self) -> ReaderHandle {
        ReaderHandle {
            task: tokio::spawn(self.run()),
        }
    }

    /// Read until the source is declared unavailable or the broadcaster closes
    pub async fn run(self) -> ReaderExit {
        // Continue numbering from whatever this broadcaster already saw
        let mut seq = self.broadcaster.last_seq();
        let mut failures: u32 = 0;

        loop {
            if self.broadcaster.is_terminated() {
                return ReaderExit::BroadcasterClosed;
            }

            let reason = match self.factory.open(&self.uri).await {
                Ok(mut source) => {
                    tracing::info!(source = %self.uri, "Source connected");
                    loop {
                        match source.next_frame().await {
                            Ok(Some(data)) => {
                                failures = 0;
                                seq += 1;
                                self.broadcaster.publish(Frame::new(seq, data));
                                if self.broadcaster.is_terminated() {
                                    return ReaderExit::BroadcasterClosed;
                                }
                            }
                            Ok(None) => break "end of stream".to_string(),
                            Err(e) => break e.to_string(),
                        }
                    }
                }
                Err(e) => e.to_string(),
            };

            failures += 1;
            if failures > self.config.max_retries {
                tracing::warn!(
                    source = %self.uri,
                    failures,
                    reason = %reason,
                    "Source unavailable, giving up"
                );
                self.broadcaster.terminate(StreamEnd::SourceUnavailable {
                    reason: reason.clone(),
                });
                return ReaderExit::SourceUnavailable { reason };
            }

            let delay = self.config.backoff(failures);
            tracing::warn!(
                source = %self.uri,
                attempt = failures,
                max_retries = self.config.max_retries,
                backoff_ms = delay.as_millis() as u64,
                reason = %reason,
                "Source read failed, reconnecting"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Handle to a spawned reader
#[derive(Debug)]
pub struct ReaderHandle {
    task: JoinHandle<ReaderExit>,
}

impl ReaderHandle {
    /// Stop reading; the broadcaster is left for its owner to terminate
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the reader to exit; `None` if it was stopped
    pub async fn join(self) -> Option<ReaderExit> {
        self.task.await.ok()
    }
}
