//! Broadcast manager implementation
//!
//! The central registry that maps stream keys to broadcasters, creates them on
//! first subscribe and tears them down after a grace period.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};

use super::config::RegistryConfig;
use super::entry::{BroadcasterEntry, BroadcasterStats, DebugStreams, PipelineTask};
use super::error::RegistryError;
use super::frame::{Pipeline, StreamKey};
use crate::broadcast::{Broadcaster, StreamEnd, Subscription};
use crate::detect::{AnnotationParams, DetectionAnnotator, Detector};
use crate::source::{SourceFactory, SourceReader};

/// Central registry for all live broadcasters
///
/// Thread-safe via `RwLock`. Subscribing to an existing broadcaster only takes
/// the read lock; creation and teardown take the write lock.
pub struct BroadcastManager {
    /// Map of stream key to broadcaster entry
    entries: RwLock<HashMap<StreamKey, BroadcasterEntry>>,

    /// Configuration
    config: RegistryConfig,

    /// Opens upstream connections for readers
    sources: Arc<dyn SourceFactory>,

    /// Model for annotated pipelines
    detector: Option<Arc<dyn Detector>>,

    /// Idle and termination notices from broadcasters
    notify_tx: mpsc::UnboundedSender<StreamKey>,
    notify_rx: Mutex<Option<mpsc::UnboundedReceiver<StreamKey>>>,

    shutting_down: AtomicBool,
}

impl BroadcastManager {
    /// Create a new manager
    pub fn new(
        config: RegistryConfig,
        sources: Arc<dyn SourceFactory>,
        detector: Option<Arc<dyn Detector>>,
    ) -> Self {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            sources,
            detector,
            notify_tx,
            notify_rx: Mutex::new(Some(notify_rx)),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Get the manager configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn has_detector(&self) -> bool {
        self.detector.is_some()
    }

    /// Subscribe to a stream, creating its pipeline on first use
    ///
    /// Raw keys get a broadcaster fed by a source reader. Annotated keys get a
    /// broadcaster fed by an annotator, which itself subscribes to the raw
    /// broadcaster of the same source.
    pub async fn subscribe(&self, key: &StreamKey) -> Result<Subscription, RegistryError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(RegistryError::ShuttingDown);
        }

        match key.pipeline {
            Pipeline::Raw => self.subscribe_raw(&key.source).await,
            Pipeline::Annotated(params) => self.subscribe_annotated(&key.source, params).await,
        }
    }

    /// Attach to an existing live broadcaster under the read lock
    async fn try_attach(&self, key: &StreamKey) -> Option<Subscription> {
        let entries = self.entries.read().await;
        entries.get(key)?.broadcaster.subscribe().ok()
    }

    /// Attach under the write lock, evicting the entry if it is already dead
    fn attach_or_evict(
        entries: &mut HashMap<StreamKey, BroadcasterEntry>,
        key: &StreamKey,
    ) -> Option<Subscription> {
        let attached = entries.get(key)?.broadcaster.subscribe();
        match attached {
            Ok(sub) => Some(sub),
            Err(end) => {
                if let Some(stale) = entries.remove(key) {
                    stale.task.stop();
                    tracing::debug!(stream = %key, reason = %end, "Replacing terminated broadcaster");
                }
                None
            }
        }
    }

    fn new_broadcaster(&self, key: StreamKey) -> Arc<Broadcaster> {
        Arc::new(
            Broadcaster::new(key, self.config.queue_capacity).with_notifier(self.notify_tx.clone()),
        )
    }

    async fn subscribe_raw(&self, source: &str) -> Result<Subscription, RegistryError> {
        let key = StreamKey::raw(source);
        if let Some(sub) = self.try_attach(&key).await {
            return Ok(sub);
        }

        let mut entries = self.entries.write().await;
        if let Some(sub) = Self::attach_or_evict(&mut entries, &key) {
            return Ok(sub);
        }

        let broadcaster = self.new_broadcaster(key.clone());
        let sub = broadcaster
            .subscribe()
            .map_err(|_| RegistryError::StreamTerminated(key.clone()))?;

        let reader = SourceReader::new(
            source,
            Arc::clone(&self.sources),
            Arc::clone(&broadcaster),
            self.config.reader.clone(),
        );
        let entry = BroadcasterEntry::new(broadcaster, PipelineTask::Reader(reader.start()), None);
        entries.insert(key.clone(), entry);

        tracing::info!(stream = %key, broadcasters = entries.len(), "Broadcaster created");
        Ok(sub)
    }

    async fn subscribe_annotated(
        &self,
        source: &str,
        params: AnnotationParams,
    ) -> Result<Subscription, RegistryError> {
        let detector = self
            .detector
            .clone()
            .ok_or(RegistryError::DetectorUnavailable)?;

        let key = StreamKey::annotated(source, params);
        if let Some(sub) = self.try_attach(&key).await {
            return Ok(sub);
        }

        // Taken before the write lock: subscribe_raw locks the map itself
        let input = self.subscribe_raw(source).await?;

        let mut entries = self.entries.write().await;
        if let Some(sub) = Self::attach_or_evict(&mut entries, &key) {
            // Lost the race to another subscriber; `input` is released on drop
            return Ok(sub);
        }

        let broadcaster = self.new_broadcaster(key.clone());
        let sub = broadcaster
            .subscribe()
            .map_err(|_| RegistryError::StreamTerminated(key.clone()))?;

        let annotator = DetectionAnnotator::new(
            params,
            self.config.annotator.clone(),
            detector,
            input,
            Arc::clone(&broadcaster),
        );
        let stats = annotator.stats();
        let task = tokio::spawn(annotator.run());

        let entry = BroadcasterEntry::new(broadcaster, PipelineTask::Annotator(task), Some(stats));
        entries.insert(key.clone(), entry);

        tracing::info!(stream = %key, broadcasters = entries.len(), "Annotated broadcaster created");
        Ok(sub)
    }

    /// Remove a broadcaster whose grace period has run out
    ///
    /// Returns true if the entry was removed.
    pub async fn reap_if_idle(&self, key: &StreamKey) -> bool {
        let mut entries = self.entries.write().await;

        let expired = match entries.get(key) {
            Some(entry) => {
                entry.broadcaster.is_terminated()
                    || entry
                        .broadcaster
                        .idle_for()
                        .is_some_and(|idle| idle >= self.config.grace_period)
            }
            None => false,
        };
        if !expired {
            return false;
        }

        if let Some(entry) = entries.remove(key) {
            Self::teardown(entry);
            tracing::info!(stream = %key, broadcasters = entries.len(), "Broadcaster removed");
        }
        true
    }

    /// Stop the pipeline task and close the broadcaster
    fn teardown(entry: BroadcasterEntry) {
        entry.task.stop();
        entry.broadcaster.terminate(StreamEnd::Shutdown);
    }

    /// React to an idle or termination notice from a broadcaster
    async fn on_notice(self: &Arc<Self>, key: StreamKey) {
        let terminated = {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(entry) => entry.broadcaster.is_terminated(),
                None => return,
            }
        };

        if terminated {
            self.reap_if_idle(&key).await;
            return;
        }

        let manager = Arc::clone(self);
        let grace = self.config.grace_period;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            manager.reap_if_idle(&key).await;
        });
    }

    /// Run cleanup once
    ///
    /// Removes broadcasters that:
    /// - Have been without subscribers longer than `grace_period`
    /// - Are terminated or whose pipeline task has exited
    pub async fn cleanup(&self) {
        let mut entries = self.entries.write().await;

        let keys_to_remove: Vec<StreamKey> = entries
            .iter()
            .filter_map(|(key, entry)| {
                let expired = entry.broadcaster.is_terminated()
                    || entry.task.is_finished()
                    || entry
                        .broadcaster
                        .idle_for()
                        .is_some_and(|idle| idle >= self.config.grace_period);
                expired.then(|| key.clone())
            })
            .collect();

        for key in keys_to_remove {
            if let Some(entry) = entries.remove(&key) {
                Self::teardown(entry);
                tracing::info!(stream = %key, "Broadcaster removed by cleanup");
            }
        }
    }

    /// Spawn the background reaper
    ///
    /// Handles idle/termination notices as they arrive and sweeps every
    /// `cleanup_interval`. Returns a handle that can be used to abort the task.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = manager.config.cleanup_interval;
        let notices = self
            .notify_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        tokio::spawn(async move {
            let Some(mut notices) = notices else {
                tracing::warn!("Reaper already running");
                return;
            };
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            loop {
                tokio::select! {
                    Some(key) = notices.recv() => manager.on_notice(key).await,
                    _ = ticker.tick() => manager.cleanup().await,
                }
            }
        })
    }

    /// Whether a broadcaster exists for `key`
    pub async fn has_stream(&self, key: &StreamKey) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// Statistics for one broadcaster
    pub async fn stream_stats(&self, key: &StreamKey) -> Option<BroadcasterStats> {
        self.entries.read().await.get(key).map(BroadcasterEntry::stats)
    }

    /// All broadcasters, sorted by key
    pub async fn streams(&self) -> DebugStreams {
        let entries = self.entries.read().await;
        let mut streams: Vec<BroadcasterStats> = entries.values().map(BroadcasterEntry::stats).collect();
        streams.sort_by(|a, b| a.key.cmp(&b.key));
        DebugStreams {
            broadcaster_count: streams.len(),
            streams,
        }
    }

    /// Get total number of broadcasters
    pub async fn broadcaster_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Terminate every broadcaster and refuse new subscriptions
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        let drained: Vec<BroadcasterEntry> = {
            let mut entries = self.entries.write().await;
            entries.drain().map(|(_, entry)| entry).collect()
        };

        tracing::info!(broadcasters = drained.len(), "Broadcast manager shutting down");
        for entry in drained {
            Self::teardown(entry);
        }
    }
}
