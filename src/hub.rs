// SensorHub: one store, one reminder scheduler, one host per entity kind

use crate::building::{
    BuildingEntity, BuildingReply, BuildingRequest, PublishSchedule, StatusReported,
    PUBLISH_STATUS_REMINDER,
};
use crate::channel::SubscriberHandle;
use crate::config::HubConfig;
use crate::error::EntityError;
use crate::runtime::{EntityHost, EntityKind, ReminderScheduler, SqliteStateStore, StateStore};
use crate::sensor::{SensorEntity, SensorReply, SensorRequest, SensorState};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Typed entry point to sensors and buildings.
pub struct SensorHub {
    store: Arc<dyn StateStore>,
    scheduler: Arc<ReminderScheduler>,
    sensors: Arc<EntityHost<SensorEntity>>,
    buildings: Arc<EntityHost<BuildingEntity>>,
    subscriber_buffer: usize,
}

impl SensorHub {
    /// Wire both entity hosts against `store`.
    pub fn new(config: &HubConfig, store: Arc<dyn StateStore>) -> Arc<Self> {
        let scheduler = ReminderScheduler::new(Arc::clone(&store));

        let max_readings = config.sensor.max_readings;
        let sensors = EntityHost::<SensorEntity>::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            move |_id: &String| SensorEntity::new(max_readings),
        );

        let schedule: PublishSchedule = config.building.schedule();
        let buildings = EntityHost::<BuildingEntity>::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            move |id: &i64| BuildingEntity::new(*id, schedule),
        );

        Arc::new(Self {
            store,
            scheduler,
            sensors,
            buildings,
            subscriber_buffer: config.api.subscriber_buffer,
        })
    }

    /// Open the configured SQLite store and build the hub on it.
    pub fn open(config: &HubConfig) -> Result<Arc<Self>> {
        let path = &config.storage.database_path;
        let store = if path == ":memory:" {
            SqliteStateStore::in_memory()?
        } else {
            SqliteStateStore::new(path).context("Failed to initialize state store")?
        };
        info!(database_path = %path, "State store initialized");
        Ok(Self::new(config, Arc::new(store)))
    }

    pub async fn update_sensor(
        &self,
        sensor_id: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), EntityError> {
        match self
            .sensors
            .call(&sensor_id.to_string(), SensorRequest::Update { value, timestamp })
            .await?
        {
            SensorReply::Updated => Ok(()),
            _ => Err(EntityError::UnexpectedReply {
                kind: EntityKind::Sensor,
            }),
        }
    }

    /// Retained readings, most recent first.
    pub async fn sensor_readings(&self, sensor_id: &str) -> Result<SensorState, EntityError> {
        match self
            .sensors
            .call(&sensor_id.to_string(), SensorRequest::Readings)
            .await?
        {
            SensorReply::Readings(state) => Ok(state),
            _ => Err(EntityError::UnexpectedReply {
                kind: EntityKind::Sensor,
            }),
        }
    }

    pub async fn sensor_average(&self, sensor_id: &str) -> Result<Option<f64>, EntityError> {
        Ok(self.sensor_readings(sensor_id).await?.average())
    }

    pub async fn report_sensor_status(
        &self,
        building_id: i64,
        sensor_id: &str,
        value: f64,
    ) -> Result<(), EntityError> {
        let request = BuildingRequest::ReportSensorStatus {
            sensor_id: sensor_id.to_string(),
            value,
        };
        match self.buildings.call(&building_id, request).await? {
            BuildingReply::Reported => Ok(()),
            _ => Err(unexpected_building_reply()),
        }
    }

    pub async fn building_status(&self, building_id: i64) -> Result<BTreeMap<String, f64>, EntityError> {
        match self.buildings.call(&building_id, BuildingRequest::Status).await? {
            BuildingReply::Status(status) => Ok(status),
            _ => Err(unexpected_building_reply()),
        }
    }

    /// Subscribe a fresh handle buffered per the API config.
    pub async fn subscribe(
        &self,
        building_id: i64,
    ) -> Result<(Uuid, mpsc::Receiver<StatusReported>), EntityError> {
        let (handle, receiver) = SubscriberHandle::channel(self.subscriber_buffer);
        let id = handle.id();
        self.subscribe_handle(building_id, handle).await?;
        Ok((id, receiver))
    }

    /// Attach an existing handle. Returns false if it was already subscribed.
    pub async fn subscribe_handle(
        &self,
        building_id: i64,
        handle: SubscriberHandle<StatusReported>,
    ) -> Result<bool, EntityError> {
        match self
            .buildings
            .call(&building_id, BuildingRequest::Subscribe(handle))
            .await?
        {
            BuildingReply::Subscription(added) => Ok(added),
            _ => Err(unexpected_building_reply()),
        }
    }

    /// Returns false if the handle was not subscribed.
    pub async fn unsubscribe(&self, building_id: i64, handle_id: Uuid) -> Result<bool, EntityError> {
        match self
            .buildings
            .call(&building_id, BuildingRequest::Unsubscribe(handle_id))
            .await?
        {
            BuildingReply::Subscription(removed) => Ok(removed),
            _ => Err(unexpected_building_reply()),
        }
    }

    /// Live subscribers on the building's channel. Activates the building.
    pub async fn subscriber_count(&self, building_id: i64) -> Result<usize, EntityError> {
        match self
            .buildings
            .call(&building_id, BuildingRequest::SubscriberCount)
            .await?
        {
            BuildingReply::Subscribers(count) => Ok(count),
            _ => Err(unexpected_building_reply()),
        }
    }

    /// Deliver the publish reminder now instead of waiting for the next tick.
    pub async fn publish_now(&self, building_id: i64) -> Result<(), EntityError> {
        self.buildings
            .fire_reminder(&building_id, PUBLISH_STATUS_REMINDER)
            .await
    }

    /// Resume every persisted reminder. Call once at startup.
    pub async fn restore_reminders(&self) -> Result<usize> {
        self.scheduler.restore().await
    }

    /// Stop reminder timers and deactivate every entity. Durable state stays.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        self.sensors.shutdown().await;
        self.buildings.shutdown().await;
        info!("Sensor hub stopped");
    }

    pub fn sensors(&self) -> &Arc<EntityHost<SensorEntity>> {
        &self.sensors
    }

    pub fn buildings(&self) -> &Arc<EntityHost<BuildingEntity>> {
        &self.buildings
    }

    pub fn scheduler(&self) -> &Arc<ReminderScheduler> {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }
}

fn unexpected_building_reply() -> EntityError {
    EntityError::UnexpectedReply {
        kind: EntityKind::Building,
    }
}
