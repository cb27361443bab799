use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::repository::RepositoryError;

use super::store::{SnapshotRecord, SnapshotStore};

/// In-memory snapshot store backed by `Arc<RwLock<HashMap>>`.
///
/// Clone-friendly (cloning shares the same underlying storage).
#[derive(Clone)]
pub struct InMemorySnapshotStore {
    storage: Arc<RwLock<HashMap<String, SnapshotRecord>>>,
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of stored snapshots. Counts through a lock poisoned by a panicking
    /// writer; the trait operations report that as `LockPoisoned` instead.
    pub fn len(&self) -> usize {
        self.storage
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn get_snapshot(&self, id: &str) -> Result<Option<SnapshotRecord>, RepositoryError> {
        let storage = self
            .storage
            .read()
            .map_err(|_| RepositoryError::LockPoisoned("snapshot read"))?;
        Ok(storage.get(id).cloned())
    }

    fn save_snapshot(&self, record: SnapshotRecord) -> Result<(), RepositoryError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| RepositoryError::LockPoisoned("snapshot write"))?;
        let newer_exists = storage
            .get(&record.aggregate_id)
            .is_some_and(|existing| existing.version > record.version);
        if !newer_exists {
            storage.insert(record.aggregate_id.clone(), record);
        }
        Ok(())
    }

    fn delete_snapshot(&self, id: &str) -> Result<bool, RepositoryError> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| RepositoryError::LockPoisoned("snapshot write"))?;
        Ok(storage.remove(id).is_some())
    }
}
