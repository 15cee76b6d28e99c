use super::{Entity, EntityContext, ReminderScheduler, ReminderTarget, StateStore};
use crate::error::EntityError;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Lifecycle of one in-memory activation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationPhase {
    Inactive,
    Activating,
    Active,
    /// Dropped from the host; a later call starts a fresh activation.
    Deactivated,
}

struct Activation<E> {
    phase: ActivationPhase,
    entity: E,
    ctx: EntityContext,
}

type Factory<E> = Box<dyn Fn(&<E as Entity>::Id) -> E + Send + Sync>;

/// Hosts every activation of one entity kind.
///
/// Each entity ID maps to an async mutex that is held for the whole of an
/// operation, including its store I/O, so two operations on the same ID never
/// interleave. Different IDs run in parallel.
pub struct EntityHost<E: Entity> {
    store: Arc<dyn StateStore>,
    reminders: Arc<ReminderScheduler>,
    factory: Factory<E>,
    activations: DashMap<E::Id, Arc<Mutex<Activation<E>>>>,
    closed: AtomicBool,
}

impl<E: Entity> EntityHost<E> {
    /// Create the host and route `E::KIND` reminders to it.
    pub fn new<F>(store: Arc<dyn StateStore>, reminders: Arc<ReminderScheduler>, factory: F) -> Arc<Self>
    where
        F: Fn(&E::Id) -> E + Send + Sync + 'static,
    {
        let host = Arc::new(Self {
            store,
            reminders: Arc::clone(&reminders),
            factory: Box::new(factory),
            activations: DashMap::new(),
            closed: AtomicBool::new(false),
        });

        let target: Weak<dyn ReminderTarget> = Arc::downgrade(&host) as Weak<dyn ReminderTarget>;
        reminders.register_target(E::KIND, target);

        host
    }

    /// Run one request against the entity, activating it first if needed.
    ///
    /// The operation runs on its own task once it holds the entity lock, so a
    /// caller that goes away mid-call cannot leave it half-applied.
    pub async fn call(&self, id: &E::Id, request: E::Request) -> Result<E::Reply, EntityError> {
        let guard = self.acquire(id).await?;

        let task = tokio::spawn(async move {
            let mut guard = guard;
            let Activation { entity, ctx, .. } = &mut *guard;
            entity.handle(ctx, request).await
        });

        task.await.map_err(|e| {
            EntityError::unavailable(E::KIND, id.to_string(), format!("operation aborted: {}", e))
        })?
    }

    /// Deliver a reminder tick, serialized with every other operation on `id`.
    pub async fn fire_reminder(&self, id: &E::Id, name: &str) -> Result<(), EntityError> {
        let guard = self.acquire(id).await?;
        debug!(kind = %E::KIND, entity_id = %id, reminder = %name, "Delivering reminder");

        let reminder = name.to_string();
        let task = tokio::spawn(async move {
            let mut guard = guard;
            let Activation { entity, ctx, .. } = &mut *guard;
            entity.on_reminder(ctx, &reminder).await
        });

        task.await.map_err(|e| {
            EntityError::unavailable(E::KIND, id.to_string(), format!("reminder aborted: {}", e))
        })?
    }

    /// Drop the in-memory activation after any in-flight operation finishes.
    ///
    /// Durable state and reminders stay; the next call or reminder tick
    /// reactivates the entity. Returns false if it was not activated.
    pub async fn deactivate(&self, id: &E::Id) -> bool {
        let Some(cell) = self.activations.get(id).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };

        let mut guard = cell.lock().await;
        if guard.phase == ActivationPhase::Deactivated {
            return false;
        }
        if guard.phase == ActivationPhase::Active {
            let Activation { entity, ctx, .. } = &mut *guard;
            entity.on_deactivate(ctx).await;
        }
        guard.phase = ActivationPhase::Deactivated;
        guard.ctx.clear();
        self.activations
            .remove_if(id, |_, current| Arc::ptr_eq(current, &cell));

        info!(kind = %E::KIND, entity_id = %id, "Entity deactivated");
        true
    }

    pub async fn deactivate_all(&self) -> usize {
        let ids: Vec<E::Id> = self
            .activations
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        join_all(ids.iter().map(|id| self.deactivate(id)))
            .await
            .into_iter()
            .filter(|deactivated| *deactivated)
            .count()
    }

    /// Refuse new operations and deactivate everything.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let count = self.deactivate_all().await;
        info!(kind = %E::KIND, deactivated = count, "Entity host stopped");
    }

    pub async fn phase(&self, id: &E::Id) -> ActivationPhase {
        let Some(cell) = self.activations.get(id).map(|entry| Arc::clone(entry.value())) else {
            return ActivationPhase::Inactive;
        };
        let guard = cell.lock().await;
        guard.phase
    }

    pub async fn is_active(&self, id: &E::Id) -> bool {
        self.phase(id).await == ActivationPhase::Active
    }

    /// Number of IDs with an in-memory activation
    pub fn activation_count(&self) -> usize {
        self.activations.len()
    }

    async fn acquire(&self, id: &E::Id) -> Result<OwnedMutexGuard<Activation<E>>, EntityError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(EntityError::unavailable(
                    E::KIND,
                    id.to_string(),
                    "entity host is shut down",
                ));
            }

            let cell = self.cell(id);
            let mut guard = cell.lock_owned().await;
            match guard.phase {
                ActivationPhase::Active => return Ok(guard),
                // Lost a race with deactivate; the map now holds a fresh cell.
                ActivationPhase::Deactivated => continue,
                // Activating here means an earlier activation was cancelled midway.
                ActivationPhase::Inactive | ActivationPhase::Activating => {
                    self.activate(id, &mut guard).await?;
                    return Ok(guard);
                }
            }
        }
    }

    async fn activate(&self, id: &E::Id, activation: &mut Activation<E>) -> Result<(), EntityError> {
        activation.phase = ActivationPhase::Activating;
        debug!(kind = %E::KIND, entity_id = %id, "Activating entity");

        if let Err(e) = activation.ctx.load().await {
            activation.phase = ActivationPhase::Inactive;
            warn!(kind = %E::KIND, entity_id = %id, error = %e, "Failed to load entity state");
            return Err(EntityError::unavailable(
                E::KIND,
                id.to_string(),
                format!("failed to load state: {}", e),
            ));
        }

        let Activation { entity, ctx, .. } = &mut *activation;
        if let Err(e) = entity.on_activate(ctx).await {
            warn!(kind = %E::KIND, entity_id = %id, error = %e, "Entity activation failed");
            *entity = (self.factory)(id);
            ctx.clear();
            activation.phase = ActivationPhase::Inactive;
            return Err(e);
        }

        activation.phase = ActivationPhase::Active;
        info!(kind = %E::KIND, entity_id = %id, "Entity activated");
        Ok(())
    }

    fn cell(&self, id: &E::Id) -> Arc<Mutex<Activation<E>>> {
        let entry = self.activations.entry(id.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(Activation {
                phase: ActivationPhase::Inactive,
                entity: (self.factory)(id),
                ctx: EntityContext::new(
                    E::KIND,
                    id.to_string(),
                    Arc::clone(&self.store),
                    Arc::clone(&self.reminders),
                ),
            }))
        });
        Arc::clone(entry.value())
    }
}

#[async_trait]
impl<E: Entity> ReminderTarget for EntityHost<E> {
    async fn deliver_reminder(&self, entity_id: &str, name: &str) -> Result<(), EntityError> {
        let id: E::Id = entity_id
            .parse()
            .map_err(|_| EntityError::unavailable(E::KIND, entity_id, "unparsable entity id"))?;
        self.fire_reminder(&id, name).await
    }
}
