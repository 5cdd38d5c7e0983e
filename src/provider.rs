use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use crate::repository::{InMemoryRepository, Repository};

/// Shared handle to one world-state partition.
pub type Track = Arc<Mutex<dyn Repository + Send>>;

/// Keyed cache of repository handles, passed explicitly to every
/// orchestrator call. The map is lock-guarded so concurrent first
/// accesses to the same partition cannot create duplicate handles.
#[derive(Default)]
pub struct TrackRegistry {
    tracks: Mutex<HashMap<String, Track>>,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository for `db_id`, created on first access.
    pub fn track(&self, db_id: &str) -> Track {
        let mut tracks = self.tracks.lock().unwrap_or_else(PoisonError::into_inner);
        tracks
            .entry(db_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(db_id, "opening repository track");
                Arc::new(Mutex::new(InMemoryRepository::new()))
            })
            .clone()
    }

    /// Repository addressed by explicit configuration and database paths,
    /// outside the default per-`db_id` namespace.
    pub fn track_by_path(&self, cfg_dir: &str, db_path: &str, db_id: &str) -> Track {
        let key = format!("{cfg_dir}:{db_path}:{db_id}");
        let mut tracks = self.tracks.lock().unwrap_or_else(PoisonError::into_inner);
        tracks
            .entry(key)
            .or_insert_with(|| {
                tracing::debug!(cfg_dir, db_path, db_id, "opening repository track by path");
                Arc::new(Mutex::new(InMemoryRepository::new()))
            })
            .clone()
    }

    /// Install a prepared repository for a partition (tests and repair
    /// tooling).
    pub fn insert(&self, db_id: &str, repository: InMemoryRepository) {
        let mut tracks = self.tracks.lock().unwrap_or_else(PoisonError::into_inner);
        tracks.insert(db_id.to_string(), Arc::new(Mutex::new(repository)));
    }
}
