//! Zone definitions and occupancy persistence

use std::collections::HashMap;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use super::types::{OccupancySummary, Zone, ZoneState};

/// Where zone definitions come from
pub trait ZoneSource: Send + Sync {
    fn get_zones<'a>(&'a self, camera_id: &'a str) -> BoxFuture<'a, Result<Vec<Zone>, StoreError>>;
}

/// Where occupancy results go
///
/// `update_occupancy` applies a cycle's states as one batch. Applying the same
/// batch twice leaves the store unchanged.
pub trait OccupancySink: Send + Sync {
    fn update_occupancy<'a>(
        &'a self,
        camera_id: &'a str,
        states: Vec<ZoneState>,
    ) -> BoxFuture<'a, Result<(), StoreError>>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown camera: {0}")]
    UnknownCamera(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// In-process zone and occupancy store
#[derive(Debug, Default)]
pub struct MemoryStore {
    zones: RwLock<HashMap<String, Vec<Zone>>>,
    occupancy: RwLock<HashMap<String, HashMap<String, ZoneState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the zones of a camera, dropping state for zones that no longer exist
    pub async fn set_zones(&self, camera_id: impl Into<String>, zones: Vec<Zone>) {
        let camera_id = camera_id.into();
        {
            let mut occupancy = self.occupancy.write().await;
            if let Some(states) = occupancy.get_mut(&camera_id) {
                states.retain(|zone_id, _| zones.iter().any(|z| &z.zone_id == zone_id));
            }
        }
        self.zones.write().await.insert(camera_id, zones);
    }

    pub async fn has_camera(&self, camera_id: &str) -> bool {
        self.zones.read().await.contains_key(camera_id)
    }

    /// Latest state per zone, ordered by zone id
    pub async fn occupancy(&self, camera_id: &str) -> Vec<ZoneState> {
        let occupancy = self.occupancy.read().await;
        let mut states: Vec<ZoneState> = occupancy
            .get(camera_id)
            .map(|states| states.values().cloned().collect())
            .unwrap_or_default();
        states.sort_by(|a, b| a.zone_id.cmp(&b.zone_id));
        states
    }

    /// Counts over the camera's configured zones; zones never observed count as free
    pub async fn summary(&self, camera_id: &str) -> OccupancySummary {
        let zones = self.zones.read().await;
        let occupancy = self.occupancy.read().await;

        let Some(zones) = zones.get(camera_id) else {
            return OccupancySummary::new(0, 0);
        };
        let occupied = occupancy
            .get(camera_id)
            .map(|states| {
                zones
                    .iter()
                    .filter(|z| states.get(&z.zone_id).is_some_and(|s| s.occupied))
                    .count()
            })
            .unwrap_or(0);
        OccupancySummary::new(zones.len(), occupied)
    }
}

impl ZoneSource for MemoryStore {
    fn get_zones<'a>(&'a self, camera_id: &'a str) -> BoxFuture<'a, Result<Vec<Zone>, StoreError>> {
        Box::pin(async move {
            self.zones
                .read()
                .await
                .get(camera_id)
                .cloned()
                .ok_or_else(|| StoreError::UnknownCamera(camera_id.to_string()))
        })
    }
}

impl OccupancySink for MemoryStore {
    fn update_occupancy<'a>(
        &'a self,
        camera_id: &'a str,
        states: Vec<ZoneState>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut occupancy = self.occupancy.write().await;
            let current = occupancy.entry(camera_id.to_string()).or_default();
            for state in states {
                // Last write wins; an older cycle never overwrites a newer one
                match current.get(&state.zone_id) {
                    Some(existing) if existing.last_updated > state.last_updated => {}
                    _ => {
                        current.insert(state.zone_id.clone(), state);
                    }
                }
            }
            Ok(())
        })
    }
}
