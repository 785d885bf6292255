//! Shared handler state

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};
use crate::occupancy::MemoryStore;
use crate::registry::BroadcastManager;
use crate::server::config::ServerConfig;
use crate::stats::ServerStats;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<BroadcastManager>,
    /// camera id -> source URI
    pub cameras: Arc<HashMap<String, String>>,
    pub store: Arc<MemoryStore>,
    pub config: Arc<ServerConfig>,
    pub stats: Arc<ServerStats>,
    session_semaphore: Option<Arc<Semaphore>>,
    next_session_id: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        manager: Arc<BroadcastManager>,
        cameras: HashMap<String, String>,
        store: Arc<MemoryStore>,
    ) -> Self {
        let session_semaphore = if config.max_sessions > 0 {
            Some(Arc::new(Semaphore::new(config.max_sessions)))
        } else {
            None
        };

        Self {
            manager,
            cameras: Arc::new(cameras),
            store,
            config: Arc::new(config),
            stats: Arc::new(ServerStats::new()),
            session_semaphore,
            next_session_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn camera_uri(&self, camera_id: &str) -> Result<&str> {
        self.cameras
            .get(camera_id)
            .map(String::as_str)
            .ok_or_else(|| Error::NotFound(format!("camera '{}'", camera_id)))
    }

    /// Reserve a viewer slot; `None` when sessions are unlimited
    pub fn acquire_session(&self) -> Result<Option<OwnedSemaphorePermit>> {
        match &self.session_semaphore {
            Some(sem) => sem.clone().try_acquire_owned().map(Some).map_err(|_| {
                Error::OverCapacity(format!(
                    "viewer limit of {} reached",
                    self.config.max_sessions
                ))
            }),
            None => Ok(None),
        }
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }
}
