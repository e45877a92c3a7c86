//! Dataset storage collaborator.
//!
//! The core only needs name-addressed load/store; where snapshots actually
//! live (files, a database, a cache) is up to the implementation.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{Result, WrangleError};
use crate::snapshot::{Snapshot, SnapshotDescription};

pub trait SnapshotStore: Send + Sync {
    fn load_snapshot(&self, name: &str) -> Result<Snapshot>;
    fn list_names(&self) -> Vec<String>;
    fn store_snapshot(&self, name: &str, snapshot: Snapshot) -> Result<()>;
    fn delete_snapshot(&self, name: &str) -> Result<()>;
    fn rename_snapshot(&self, old: &str, new: &str) -> Result<()>;

    fn contains(&self, name: &str) -> bool {
        self.list_names().iter().any(|n| n == name)
    }

    fn describe_snapshot(&self, name: &str) -> Result<SnapshotDescription> {
        Ok(self.load_snapshot(name)?.describe())
    }
}

/// In-process store, scoped to whoever owns it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: RwLock<BTreeMap<String, Snapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> WrangleError {
        WrangleError::Internal("snapshot store lock poisoned".to_string())
    }
}

impl SnapshotStore for MemoryStore {
    fn load_snapshot(&self, name: &str) -> Result<Snapshot> {
        let map = self.snapshots.read().map_err(|_| Self::poisoned())?;
        map.get(name)
            .cloned()
            .ok_or_else(|| WrangleError::NotFound(name.to_string()))
    }

    fn list_names(&self) -> Vec<String> {
        self.snapshots
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn store_snapshot(&self, name: &str, snapshot: Snapshot) -> Result<()> {
        let mut map = self.snapshots.write().map_err(|_| Self::poisoned())?;
        let snapshot = if snapshot.name() == name {
            snapshot
        } else {
            snapshot.renamed(name)
        };
        map.insert(name.to_string(), snapshot);
        Ok(())
    }

    fn delete_snapshot(&self, name: &str) -> Result<()> {
        let mut map = self.snapshots.write().map_err(|_| Self::poisoned())?;
        map.remove(name)
            .map(|_| ())
            .ok_or_else(|| WrangleError::NotFound(name.to_string()))
    }

    fn rename_snapshot(&self, old: &str, new: &str) -> Result<()> {
        let mut map = self.snapshots.write().map_err(|_| Self::poisoned())?;
        if map.contains_key(new) {
            return Err(WrangleError::InvalidState(format!(
                "Dataset '{}' already exists",
                new
            )));
        }
        let snapshot = map
            .remove(old)
            .ok_or_else(|| WrangleError::NotFound(old.to_string()))?;
        map.insert(new.to_string(), snapshot.renamed(new));
        Ok(())
    }
}
