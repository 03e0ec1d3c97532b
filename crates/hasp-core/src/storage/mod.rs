//! Durable persistence for the handful of records that must survive restart.
//!
//! A restart reconstructs every transient timer purely from persisted epoch
//! values, so the security-relevant records (cloud cooldown, clock anchor,
//! replay ledger) are saved synchronously at their mutation sites. Callers
//! treat load failures as "use defaults" rather than fatal.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::local::replay::ReplayRecord;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying file I/O failed.
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// The state document could not be parsed or serialized.
    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Internal lock poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,
}

/// Durable load/save of the controller's persisted records.
pub trait PersistenceGateway {
    /// Loads the persisted clock anchor epoch, zero when never set.
    fn load_clock_anchor(&self) -> Result<u64, StorageError>;

    /// Persists the clock anchor epoch.
    fn save_clock_anchor(&self, epoch_secs: u64) -> Result<(), StorageError>;

    /// Loads the cloud cooldown deadline epoch, zero when none is in force.
    fn load_cloud_cooldown_until(&self) -> Result<u64, StorageError>;

    /// Persists the cloud cooldown deadline epoch.
    fn save_cloud_cooldown_until(&self, epoch_secs: u64) -> Result<(), StorageError>;

    /// Loads persisted replay records, at most `max_count` of them.
    fn load_replay_records(&self, max_count: usize) -> Result<Vec<ReplayRecord>, StorageError>;

    /// Persists the replay records, replacing the previous set.
    fn save_replay_records(&self, records: &[ReplayRecord]) -> Result<(), StorageError>;
}

/// The single persisted state document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    clock_anchor: u64,

    #[serde(default)]
    cloud_cooldown_until: u64,

    #[serde(default)]
    replay: Vec<ReplayRecord>,
}

/// JSON-file-backed gateway.
///
/// Keeps all records in one small document and performs read-modify-write
/// saves so that each save call leaves the other records intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Opens the store, creating an empty state document if none exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let store = Self { path: path.into() };
        if !store.path.exists() {
            store.write_document(&StateDocument::default())?;
            tracing::info!(path = %store.path.display(), "created state document");
        }
        Ok(store)
    }

    fn read_document(&self) -> Result<StateDocument, StorageError> {
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_document(&self, doc: &StateDocument) -> Result<(), StorageError> {
        let content = serde_json::to_string(doc)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    fn update(
        &self,
        mutate: impl FnOnce(&mut StateDocument),
    ) -> Result<(), StorageError> {
        let mut doc = self.read_document().unwrap_or_default();
        mutate(&mut doc);
        self.write_document(&doc)
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistenceGateway for FileStore {
    fn load_clock_anchor(&self) -> Result<u64, StorageError> {
        Ok(self.read_document()?.clock_anchor)
    }

    fn save_clock_anchor(&self, epoch_secs: u64) -> Result<(), StorageError> {
        self.update(|doc| doc.clock_anchor = epoch_secs)
    }

    fn load_cloud_cooldown_until(&self) -> Result<u64, StorageError> {
        Ok(self.read_document()?.cloud_cooldown_until)
    }

    fn save_cloud_cooldown_until(&self, epoch_secs: u64) -> Result<(), StorageError> {
        self.update(|doc| doc.cloud_cooldown_until = epoch_secs)
    }

    fn load_replay_records(&self, max_count: usize) -> Result<Vec<ReplayRecord>, StorageError> {
        let mut replay = self.read_document()?.replay;
        replay.truncate(max_count);
        Ok(replay)
    }

    fn save_replay_records(&self, records: &[ReplayRecord]) -> Result<(), StorageError> {
        self.update(|doc| doc.replay = records.to_vec())
    }
}

/// In-memory gateway for tests and simulated restarts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StateDocument>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceGateway for MemoryStore {
    fn load_clock_anchor(&self) -> Result<u64, StorageError> {
        let state = self.state.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.clock_anchor)
    }

    fn save_clock_anchor(&self, epoch_secs: u64) -> Result<(), StorageError> {
        let mut state = self.state.lock().map_err(|_| StorageError::LockPoisoned)?;
        state.clock_anchor = epoch_secs;
        Ok(())
    }

    fn load_cloud_cooldown_until(&self) -> Result<u64, StorageError> {
        let state = self.state.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(state.cloud_cooldown_until)
    }

    fn save_cloud_cooldown_until(&self, epoch_secs: u64) -> Result<(), StorageError> {
        let mut state = self.state.lock().map_err(|_| StorageError::LockPoisoned)?;
        state.cloud_cooldown_until = epoch_secs;
        Ok(())
    }

    fn load_replay_records(&self, max_count: usize) -> Result<Vec<ReplayRecord>, StorageError> {
        let state = self.state.lock().map_err(|_| StorageError::LockPoisoned)?;
        let mut replay = state.replay.clone();
        replay.truncate(max_count);
        Ok(replay)
    }

    fn save_replay_records(&self, records: &[ReplayRecord]) -> Result<(), StorageError> {
        let mut state = self.state.lock().map_err(|_| StorageError::LockPoisoned)?;
        state.replay = records.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_all_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStore::open(&path).unwrap();

        store.save_clock_anchor(1_700_000_000).unwrap();
        store.save_cloud_cooldown_until(1_700_000_300).unwrap();
        store
            .save_replay_records(&[ReplayRecord {
                ts: 1_700_000_100,
                sig: "ab".repeat(32),
            }])
            .unwrap();

        // Saves are read-modify-write: each record survives the others.
        assert_eq!(store.load_clock_anchor().unwrap(), 1_700_000_000);
        assert_eq!(store.load_cloud_cooldown_until().unwrap(), 1_700_000_300);
        let replay = store.load_replay_records(32).unwrap();
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].ts, 1_700_000_100);
    }

    #[test]
    fn file_store_creates_missing_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStore::open(&path).unwrap();

        assert!(path.exists());
        assert_eq!(store.load_clock_anchor().unwrap(), 0);
        assert!(store.load_replay_records(32).unwrap().is_empty());
    }

    #[test]
    fn replay_load_is_capped() {
        let store = MemoryStore::new();
        let records: Vec<ReplayRecord> = (0..10)
            .map(|i| ReplayRecord {
                ts: i,
                sig: format!("sig{i}"),
            })
            .collect();
        store.save_replay_records(&records).unwrap();

        assert_eq!(store.load_replay_records(4).unwrap().len(), 4);
    }
}
