use super::store::run_blocking;
use super::{EntityKind, ReminderScheduler, StateStore};
use crate::error::EntityError;
use chrono::TimeDelta;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Per-activation view of one entity's durable state and reminders.
///
/// Only reachable through the entity's exclusive lock, so reads never observe a
/// concurrent writer. Writes go to the store first; the cached copy changes only
/// once the store accepted the value.
pub struct EntityContext {
    kind: EntityKind,
    entity_id: String,
    state: BTreeMap<String, Value>,
    store: Arc<dyn StateStore>,
    reminders: Arc<ReminderScheduler>,
}

impl EntityContext {
    pub(crate) fn new(
        kind: EntityKind,
        entity_id: String,
        store: Arc<dyn StateStore>,
        reminders: Arc<ReminderScheduler>,
    ) -> Self {
        Self {
            kind,
            entity_id,
            state: BTreeMap::new(),
            store,
            reminders,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Replace the cache with what the store holds.
    pub(crate) async fn load(&mut self) -> Result<(), EntityError> {
        let (kind, id) = (self.kind, self.entity_id.clone());
        let state = run_blocking(&self.store, move |store| store.load_state(kind, &id))
            .await
            .map_err(EntityError::Persistence)?;
        debug!(kind = %self.kind, entity_id = %self.entity_id, entries = state.len(), "Loaded entity state");
        self.state = state;
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.state.clear();
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, EntityError> {
        self.state
            .get(key)
            .map(|value| {
                T::deserialize(value).map_err(|source| EntityError::StateCodec {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.state.contains_key(key)
    }

    /// State keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.state.keys().map(String::as_str)
    }

    /// Durably write `value` under `key`.
    pub async fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), EntityError> {
        let value = serde_json::to_value(value).map_err(|source| EntityError::StateCodec {
            key: key.to_string(),
            source,
        })?;

        let (kind, id, entry, stored) = (
            self.kind,
            self.entity_id.clone(),
            key.to_string(),
            value.clone(),
        );
        run_blocking(&self.store, move |store| {
            store.save_state(kind, &id, &entry, &stored)
        })
        .await
        .map_err(EntityError::Persistence)?;

        self.state.insert(key.to_string(), value);
        Ok(())
    }

    /// Durably delete `key`. Returns false if it was not set.
    pub async fn remove(&mut self, key: &str) -> Result<bool, EntityError> {
        let (kind, id, entry) = (self.kind, self.entity_id.clone(), key.to_string());
        let removed = run_blocking(&self.store, move |store| {
            store.remove_state(kind, &id, &entry)
        })
        .await
        .map_err(EntityError::Persistence)?;

        self.state.remove(key);
        Ok(removed)
    }

    /// Register a recurring reminder for this entity.
    ///
    /// Fails with [`EntityError::InvalidSchedule`] when `period <= 0` or
    /// `due_time < 0`; nothing is registered in that case.
    pub async fn register_reminder(
        &self,
        name: &str,
        due_time: TimeDelta,
        period: TimeDelta,
    ) -> Result<(), EntityError> {
        self.reminders
            .register(self.kind, &self.entity_id, name, due_time, period)
            .await
    }

    pub async fn unregister_reminder(&self, name: &str) -> Result<bool, EntityError> {
        self.reminders
            .unregister(self.kind, &self.entity_id, name)
            .await
    }
}
