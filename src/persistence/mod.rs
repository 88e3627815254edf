// Registry snapshot persistence
pub mod file;
pub mod redis_store;

pub use self::file::JsonFileStore;
pub use self::redis_store::RedisStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

use crate::models::{BasketOrder, EntryPositionOrder};
use crate::Result;

/// Complete registry state, written whole on every mutation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub baskets: Vec<BasketOrder>,
    pub entries: Vec<EntryPositionOrder>,
}

impl RegistrySnapshot {
    pub fn is_empty(&self) -> bool {
        self.baskets.is_empty() && self.entries.is_empty()
    }
}

/// Durable home of the registry snapshot
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save_snapshot(&self, snapshot: &RegistrySnapshot) -> Result<()>;

    /// `None` when nothing was saved yet
    async fn load_snapshot(&self) -> Result<Option<RegistrySnapshot>>;
}

/// Process-local store, used in tests and dry runs
#[derive(Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<RegistrySnapshot>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: RegistrySnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            saves: Mutex::new(0),
        }
    }

    pub fn current(&self) -> Option<RegistrySnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn save_snapshot(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<RegistrySnapshot>> {
        Ok(self.current())
    }
}
