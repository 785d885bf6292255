//! Broadcaster entry and introspection types
//!
//! This module defines the per-stream state stored in the manager.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::frame::{Pipeline, StreamKey};
use crate::broadcast::{Broadcaster, BroadcasterState};
use crate::detect::AnnotatorExit;
use crate::source::ReaderHandle;
use crate::stats::{AnnotatorSnapshot, AnnotatorStats};

/// Task feeding a broadcaster
#[derive(Debug)]
pub enum PipelineTask {
    /// Raw broadcaster fed by a source reader
    Reader(ReaderHandle),
    /// Annotated broadcaster fed by a detection annotator
    Annotator(JoinHandle<AnnotatorExit>),
}

impl PipelineTask {
    pub fn stop(&self) {
        match self {
            PipelineTask::Reader(handle) => handle.stop(),
            PipelineTask::Annotator(task) => task.abort(),
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            PipelineTask::Reader(handle) => handle.is_finished(),
            PipelineTask::Annotator(task) => task.is_finished(),
        }
    }
}

/// Entry for a single broadcaster in the manager
#[derive(Debug)]
pub struct BroadcasterEntry {
    /// The fan-out point
    pub broadcaster: Arc<Broadcaster>,

    /// Reader or annotator publishing into the broadcaster
    pub task: PipelineTask,

    /// Annotator counters, for annotated pipelines
    pub annotator: Option<Arc<AnnotatorStats>>,

    /// When the entry was created
    pub created_at: Instant,
}

impl BroadcasterEntry {
    pub(super) fn new(
        broadcaster: Arc<Broadcaster>,
        task: PipelineTask,
        annotator: Option<Arc<AnnotatorStats>>,
    ) -> Self {
        Self {
            broadcaster,
            task,
            annotator,
            created_at: Instant::now(),
        }
    }

    /// Snapshot for introspection
    pub fn stats(&self) -> BroadcasterStats {
        let key = self.broadcaster.key();
        BroadcasterStats {
            key: key.to_string(),
            source: key.source.clone(),
            pipeline: match key.pipeline {
                Pipeline::Raw => "raw".to_string(),
                Pipeline::Annotated(params) => params.to_string(),
            },
            subscribers: self.broadcaster.subscriber_count(),
            seq: self.broadcaster.last_seq(),
            published: self.broadcaster.published(),
            overruns: self.broadcaster.overruns(),
            state: self.broadcaster.state(),
            idle_ms: self
                .broadcaster
                .idle_for()
                .map(|idle| idle.as_millis() as u64),
            age_secs: self.created_at.elapsed().as_secs(),
            annotator: self.annotator.as_ref().map(|stats| stats.snapshot()),
        }
    }

    pub fn key(&self) -> &StreamKey {
        self.broadcaster.key()
    }
}

/// Statistics for one broadcaster
#[derive(Debug, Clone, Serialize)]
pub struct BroadcasterStats {
    /// Full stream key
    pub key: String,
    /// Upstream URI
    pub source: String,
    /// "raw" or the annotation parameters
    pub pipeline: String,
    /// Number of attached subscribers
    pub subscribers: usize,
    /// Sequence number of the last published frame
    pub seq: u64,
    /// Frames published so far
    pub published: u64,
    /// Frames evicted from subscriber queues
    pub overruns: u64,
    /// Current lifecycle state
    pub state: BroadcasterState,
    /// Time spent with no subscribers, while in grace period
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_ms: Option<u64>,
    /// Seconds since creation
    pub age_secs: u64,
    /// Annotator counters for annotated pipelines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotator: Option<AnnotatorSnapshot>,
}

/// Response body of the debug listing
#[derive(Debug, Clone, Serialize)]
pub struct DebugStreams {
    pub broadcaster_count: usize,
    pub streams: Vec<BroadcasterStats>,
}
