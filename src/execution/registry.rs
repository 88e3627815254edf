use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::EventBus;
use crate::models::{
    BasketConfig, BasketOrder, BasketPatch, EntityKind, EntryPositionOrder, ExecutionEvent,
};
use crate::persistence::{RegistrySnapshot, SnapshotStore};
use crate::Result;

#[derive(Default)]
struct RegistryState {
    baskets: HashMap<Uuid, BasketOrder>,
    entries: HashMap<Uuid, EntryPositionOrder>,
}

/// In-memory table of baskets and entries
///
/// Every mutation writes the full snapshot through the store and emits one
/// event per execution-log entry it appended. A failed save is logged and
/// does not roll back the in-memory change.
#[derive(Clone)]
pub struct Registry {
    state: Arc<RwLock<RegistryState>>,
    store: Arc<dyn SnapshotStore>,
    events: EventBus,
}

impl Registry {
    pub fn new(store: Arc<dyn SnapshotStore>, events: EventBus) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
            store,
            events,
        }
    }

    /// Registry restored from the store's last snapshot
    pub async fn load(store: Arc<dyn SnapshotStore>, events: EventBus) -> Result<Self> {
        let registry = Self::new(store, events);
        if let Some(snapshot) = registry.store.load_snapshot().await? {
            let mut state = registry.write();
            state.baskets = snapshot.baskets.into_iter().map(|b| (b.id, b)).collect();
            state.entries = snapshot.entries.into_iter().map(|e| (e.id, e)).collect();
            tracing::info!(
                "Restored {} baskets and {} entries from persistence",
                state.baskets.len(),
                state.entries.len()
            );
        }
        Ok(registry)
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.read();
        let mut baskets: Vec<BasketOrder> = state.baskets.values().cloned().collect();
        baskets.sort_by_key(|b| b.created_at);
        let mut entries: Vec<EntryPositionOrder> = state.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.created_at);
        RegistrySnapshot { baskets, entries }
    }

    async fn persist(&self) {
        let snapshot = self.snapshot();
        if let Err(e) = self.store.save_snapshot(&snapshot).await {
            tracing::warn!("Failed to persist registry snapshot: {}", e);
        }
    }

    fn emit_all(&self, events: Vec<ExecutionEvent>) {
        for event in events {
            self.events.emit(event);
        }
    }

    // ------------------------------------------------------------------
    // Baskets
    // ------------------------------------------------------------------

    /// Validate and register a new pending basket
    pub async fn create(&self, config: BasketConfig) -> Result<Uuid> {
        config.validate()?;

        let basket = BasketOrder::new(config);
        let id = basket.id;
        let events: Vec<ExecutionEvent> = basket
            .execution_log
            .iter()
            .map(|log| ExecutionEvent::from_log(id, EntityKind::Basket, log))
            .collect();

        tracing::info!(basket = %id, symbol = %basket.symbol, side = %basket.side, "Basket created");
        self.write().baskets.insert(id, basket);

        self.emit_all(events);
        self.persist().await;
        Ok(id)
    }

    /// Patch a non-terminal basket; `Ok(false)` for unknown or terminal ids
    pub async fn update(&self, id: Uuid, patch: BasketPatch) -> Result<bool> {
        let outcome = self
            .mutate(id, |basket| {
                if basket.status.is_terminal() {
                    return Ok(false);
                }
                basket.apply_patch(patch).map(|_| true)
            })
            .await;

        outcome.unwrap_or(Ok(false))
    }

    pub fn get(&self, id: Uuid) -> Option<BasketOrder> {
        self.read().baskets.get(&id).cloned()
    }

    /// All baskets, oldest first
    pub fn list(&self) -> Vec<BasketOrder> {
        self.snapshot().baskets
    }

    /// Baskets matching `filter`, oldest first
    pub fn find(&self, filter: impl Fn(&BasketOrder) -> bool) -> Vec<BasketOrder> {
        let mut found: Vec<BasketOrder> = self
            .read()
            .baskets
            .values()
            .filter(|b| filter(b))
            .cloned()
            .collect();
        found.sort_by_key(|b| b.created_at);
        found
    }

    /// Mutate a basket in place, then emit and persist
    ///
    /// Returns `None` when the id is unknown.
    pub async fn mutate<R>(&self, id: Uuid, f: impl FnOnce(&mut BasketOrder) -> R) -> Option<R> {
        let (result, events) = {
            let mut state = self.write();
            let basket = state.baskets.get_mut(&id)?;
            let logged_before = basket.execution_log.len();
            let result = f(basket);
            let events: Vec<ExecutionEvent> = basket.execution_log[logged_before..]
                .iter()
                .map(|log| ExecutionEvent::from_log(id, EntityKind::Basket, log))
                .collect();
            (result, events)
        };

        self.emit_all(events);
        self.persist().await;
        Some(result)
    }

    // ------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------

    pub async fn insert_entry(&self, entry: EntryPositionOrder) -> Uuid {
        let id = entry.id;
        let events: Vec<ExecutionEvent> = entry
            .execution_log
            .iter()
            .map(|log| ExecutionEvent::from_log(id, EntityKind::Entry, log))
            .collect();

        self.write().entries.insert(id, entry);

        self.emit_all(events);
        self.persist().await;
        id
    }

    pub fn entry(&self, id: Uuid) -> Option<EntryPositionOrder> {
        self.read().entries.get(&id).cloned()
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Vec<EntryPositionOrder> {
        self.snapshot().entries
    }

    pub async fn mutate_entry<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut EntryPositionOrder) -> R,
    ) -> Option<R> {
        let (result, events) = {
            let mut state = self.write();
            let entry = state.entries.get_mut(&id)?;
            let logged_before = entry.execution_log.len();
            let result = f(entry);
            let events: Vec<ExecutionEvent> = entry.execution_log[logged_before..]
                .iter()
                .map(|log| ExecutionEvent::from_log(id, EntityKind::Entry, log))
                .collect();
            (result, events)
        };

        self.emit_all(events);
        self.persist().await;
        Some(result)
    }
}
