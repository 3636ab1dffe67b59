use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{RegistryError, RegistryResult};

/// A saved projection: the topic it came from, the offset of the last
/// record it reflects, and the `SchemaStore::snapshot` bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub topic: String,
    pub offset: i64,
    pub data: Vec<u8>,
}

/// Persistence for store checkpoints. One checkpoint per topic (latest wins).
pub trait CheckpointStore: Send + Sync {
    fn load(&self, topic: &str) -> RegistryResult<Option<Checkpoint>>;

    /// Save (or overwrite) the checkpoint for its topic.
    fn save(&self, checkpoint: Checkpoint) -> RegistryResult<()>;

    /// Returns true if a checkpoint existed.
    fn clear(&self, topic: &str) -> RegistryResult<bool>;
}

/// In-memory checkpoint store backed by `Arc<RwLock<HashMap>>`.
///
/// Clone-friendly (cloning shares the same underlying storage), so a
/// restarted replicator can be handed the checkpoints of its predecessor.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    storage: Arc<RwLock<HashMap<String, Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, topic: &str) -> RegistryResult<Option<Checkpoint>> {
        let storage = self
            .storage
            .read()
            .map_err(|_| RegistryError::LockPoisoned("checkpoint read"))?;
        Ok(storage.get(topic).cloned())
    }

    fn save(&self, checkpoint: Checkpoint) -> RegistryResult<()> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| RegistryError::LockPoisoned("checkpoint write"))?;
        storage.insert(checkpoint.topic.clone(), checkpoint);
        Ok(())
    }

    fn clear(&self, topic: &str) -> RegistryResult<bool> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| RegistryError::LockPoisoned("checkpoint write"))?;
        Ok(storage.remove(topic).is_some())
    }
}
