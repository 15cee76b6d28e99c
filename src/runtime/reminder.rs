use super::store::run_blocking;
use super::{EntityKind, StateStore};
use crate::error::EntityError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Upper bound on due time and period: one year.
pub const MAX_SCHEDULE_MS: i64 = 365 * 24 * 60 * 60 * 1000;

/// Durable reminder registration.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReminderRecord {
    pub kind: EntityKind,
    pub entity_id: String,
    pub name: String,
    pub due_time_ms: i64,
    pub period_ms: i64,
    /// Wall-clock instant of the next delivery
    pub next_fire_at: DateTime<Utc>,
}

impl ReminderRecord {
    fn key(&self) -> ReminderKey {
        ReminderKey {
            kind: self.kind,
            entity_id: self.entity_id.clone(),
            name: self.name.clone(),
        }
    }

    fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.max(1) as u64)
    }
}

/// Receives reminder ticks for one entity kind.
#[async_trait]
pub trait ReminderTarget: Send + Sync {
    /// Deliver a tick, activating the entity first if needed.
    async fn deliver_reminder(&self, entity_id: &str, name: &str) -> Result<(), EntityError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ReminderKey {
    kind: EntityKind,
    entity_id: String,
    name: String,
}

struct ActiveTimer {
    due_time_ms: i64,
    period_ms: i64,
    handle: JoinHandle<()>,
}

/// Drives persisted reminders, one interval task per registration.
///
/// Ticks are routed by [`EntityKind`] to the registered [`ReminderTarget`], which
/// serializes them with every other operation on the target entity. A missed
/// tick (process down, entity busy) is delivered once, not replayed per period.
pub struct ReminderScheduler {
    store: Arc<dyn StateStore>,
    targets: DashMap<EntityKind, Weak<dyn ReminderTarget>>,
    timers: DashMap<ReminderKey, ActiveTimer>,
}

impl ReminderScheduler {
    pub fn new(store: Arc<dyn StateStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            targets: DashMap::new(),
            timers: DashMap::new(),
        })
    }

    /// Route ticks for `kind` to `target`. Replaces any earlier target.
    pub fn register_target(&self, kind: EntityKind, target: Weak<dyn ReminderTarget>) {
        self.targets.insert(kind, target);
    }

    /// Register (or confirm) a recurring reminder and start its timer.
    ///
    /// Re-registering the same name with the same schedule is a no-op; a
    /// different schedule replaces the old one.
    pub async fn register(
        self: &Arc<Self>,
        kind: EntityKind,
        entity_id: &str,
        name: &str,
        due_time: TimeDelta,
        period: TimeDelta,
    ) -> Result<(), EntityError> {
        let period_ms = period.num_milliseconds();
        if period_ms <= 0 {
            return Err(EntityError::InvalidSchedule {
                name: name.to_string(),
                reason: format!("period must be positive, got {}ms", period_ms),
            });
        }
        let due_time_ms = due_time.num_milliseconds();
        if due_time_ms < 0 {
            return Err(EntityError::InvalidSchedule {
                name: name.to_string(),
                reason: format!("due time must not be negative, got {}ms", due_time_ms),
            });
        }
        if period_ms > MAX_SCHEDULE_MS || due_time_ms > MAX_SCHEDULE_MS {
            return Err(EntityError::InvalidSchedule {
                name: name.to_string(),
                reason: format!(
                    "due time and period must not exceed {}ms, got {}ms and {}ms",
                    MAX_SCHEDULE_MS, due_time_ms, period_ms
                ),
            });
        }

        let key = ReminderKey {
            kind,
            entity_id: entity_id.to_string(),
            name: name.to_string(),
        };

        if let Some(timer) = self.timers.get(&key) {
            if timer.due_time_ms == due_time_ms && timer.period_ms == period_ms {
                debug!(kind = %kind, entity_id = %entity_id, reminder = %name, "Reminder already registered");
                return Ok(());
            }
        }

        let (id, reminder) = (entity_id.to_string(), name.to_string());
        let existing = run_blocking(&self.store, move |store| {
            store.load_reminder(kind, &id, &reminder)
        })
        .await
        .map_err(EntityError::Persistence)?;

        // Keep the persisted fire time when the schedule is unchanged so a
        // re-registration after restart does not push the next tick back.
        let record = match existing {
            Some(record) if record.due_time_ms == due_time_ms && record.period_ms == period_ms => {
                record
            }
            _ => ReminderRecord {
                kind,
                entity_id: entity_id.to_string(),
                name: name.to_string(),
                due_time_ms,
                period_ms,
                next_fire_at: Utc::now().checked_add_signed(due_time).ok_or_else(|| {
                    EntityError::InvalidSchedule {
                        name: name.to_string(),
                        reason: format!("due time {}ms is out of range", due_time_ms),
                    }
                })?,
            },
        };

        let to_save = record.clone();
        run_blocking(&self.store, move |store| store.save_reminder(&to_save))
            .await
            .map_err(EntityError::Persistence)?;

        info!(
            kind = %kind,
            entity_id = %entity_id,
            reminder = %name,
            due_time_ms = due_time_ms,
            period_ms = period_ms,
            "Reminder registered"
        );

        self.start_timer(record);
        Ok(())
    }

    /// Stop and forget a reminder. Returns false if it was not registered.
    pub async fn unregister(
        &self,
        kind: EntityKind,
        entity_id: &str,
        name: &str,
    ) -> Result<bool, EntityError> {
        let key = ReminderKey {
            kind,
            entity_id: entity_id.to_string(),
            name: name.to_string(),
        };
        let stopped = match self.timers.remove(&key) {
            Some((_, timer)) => {
                timer.handle.abort();
                true
            }
            None => false,
        };

        let (id, reminder) = (entity_id.to_string(), name.to_string());
        let deleted = run_blocking(&self.store, move |store| {
            store.delete_reminder(kind, &id, &reminder)
        })
        .await
        .map_err(EntityError::Persistence)?;

        if stopped || deleted {
            info!(kind = %kind, entity_id = %entity_id, reminder = %name, "Reminder unregistered");
        }
        Ok(stopped || deleted)
    }

    /// Start timers for every persisted reminder that is not already running.
    ///
    /// Call once at startup after all targets are registered.
    pub async fn restore(self: &Arc<Self>) -> Result<usize> {
        let records = run_blocking(&self.store, |store| store.load_reminders()).await?;

        let mut started = 0;
        for record in records {
            if self.timers.contains_key(&record.key()) {
                continue;
            }
            debug!(
                kind = %record.kind,
                entity_id = %record.entity_id,
                reminder = %record.name,
                next_fire_at = %record.next_fire_at,
                "Restoring reminder"
            );
            self.start_timer(record);
            started += 1;
        }

        info!(count = started, "Restored persisted reminders");
        Ok(started)
    }

    pub fn is_registered(&self, kind: EntityKind, entity_id: &str, name: &str) -> bool {
        self.timers.contains_key(&ReminderKey {
            kind,
            entity_id: entity_id.to_string(),
            name: name.to_string(),
        })
    }

    /// Number of running reminder timers
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }

    /// Stop every timer. Persisted records are kept for the next `restore`.
    pub fn shutdown(&self) {
        for entry in self.timers.iter() {
            entry.value().handle.abort();
        }
        self.timers.clear();
        info!("Reminder scheduler stopped");
    }

    fn start_timer(self: &Arc<Self>, record: ReminderRecord) {
        let key = record.key();
        let due_time_ms = record.due_time_ms;
        let period_ms = record.period_ms;
        let delay = (record.next_fire_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let period = record.period();
        let scheduler = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let Some(strong) = scheduler.upgrade() else {
                    break;
                };
                // Delivery runs detached so aborting this timer never cuts a
                // reminder callback off halfway through.
                let delivery = tokio::spawn(strong.fire(record.clone()));
                if let Err(e) = delivery.await {
                    error!(error = %e, reminder = %record.name, "Reminder delivery task failed");
                }
            }
        });

        if let Some(previous) = self.timers.insert(
            key,
            ActiveTimer {
                due_time_ms,
                period_ms,
                handle,
            },
        ) {
            previous.handle.abort();
        }
    }

    async fn fire(self: Arc<Self>, record: ReminderRecord) {
        let target = self
            .targets
            .get(&record.kind)
            .and_then(|target| target.upgrade());

        let Some(target) = target else {
            warn!(
                kind = %record.kind,
                entity_id = %record.entity_id,
                reminder = %record.name,
                "No live target for reminder, skipping tick"
            );
            return;
        };

        if let Err(e) = target
            .deliver_reminder(&record.entity_id, &record.name)
            .await
        {
            warn!(
                kind = %record.kind,
                entity_id = %record.entity_id,
                reminder = %record.name,
                error = %e,
                "Reminder delivery failed, will retry next period"
            );
            return;
        }

        let next_fire_at = match TimeDelta::try_milliseconds(record.period_ms)
            .and_then(|period| Utc::now().checked_add_signed(period))
        {
            Some(at) => at,
            None => {
                error!(
                    entity_id = %record.entity_id,
                    reminder = %record.name,
                    period_ms = record.period_ms,
                    "Next reminder fire time is out of range, not persisted"
                );
                return;
            }
        };
        let (kind, id, name) = (record.kind, record.entity_id.clone(), record.name.clone());
        if let Err(e) = run_blocking(&self.store, move |store| {
            store.reschedule_reminder(kind, &id, &name, next_fire_at)
        })
        .await
        {
            error!(
                entity_id = %record.entity_id,
                reminder = %record.name,
                error = %e,
                "Failed to persist next reminder fire time"
            );
        }
    }
}
