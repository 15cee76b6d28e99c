// Building entity: latest reading per sensor, published on a reminder

use crate::channel::{EventChannel, SubscriberHandle};
use crate::error::EntityError;
use crate::runtime::{Entity, EntityContext, EntityKind};
use async_trait::async_trait;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;


/// Name of the reminder that drives status publication
pub const PUBLISH_STATUS_REMINDER: &str = "PublishBuildingStatus";

/// Aggregated snapshot sent to subscribers once per period.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReported {
    pub building_id: i64,
    pub status: BTreeMap<String, f64>,
}

/// Publish schedule for building entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublishSchedule {
    pub due_time_ms: i64,
    pub period_ms: i64,
}

impl Default for PublishSchedule {
    fn default() -> Self {
        Self {
            due_time_ms: 5000,
            period_ms: 5000,
        }
    }
}

#[derive(Debug)]
pub enum BuildingRequest {
    ReportSensorStatus { sensor_id: String, value: f64 },
    Subscribe(SubscriberHandle<StatusReported>),
    Unsubscribe(Uuid),
    Status,
    SubscriberCount,
}

#[derive(Debug)]
pub enum BuildingReply {
    Reported,
    /// Whether the subscribe or unsubscribe changed the subscriber set
    Subscription(bool),
    Status(BTreeMap<String, f64>),
    Subscribers(usize),
}

pub struct BuildingEntity {
    id: i64,
    schedule: PublishSchedule,
    channel: EventChannel<StatusReported>,
}

impl BuildingEntity {
    pub fn new(id: i64, schedule: PublishSchedule) -> Self {
        Self {
            id,
            schedule,
            channel: EventChannel::new(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.channel.len()
    }

    /// Every sensor key with its last reported value.
    fn snapshot(ctx: &EntityContext) -> Result<BTreeMap<String, f64>, EntityError> {
        let mut status = BTreeMap::new();
        for key in ctx.keys() {
            if let Some(value) = ctx.get::<f64>(key)? {
                status.insert(key.to_string(), value);
            }
        }
        Ok(status)
    }

    fn publish_status(&mut self, ctx: &EntityContext) -> Result<(), EntityError> {
        let event = StatusReported {
            building_id: self.id,
            status: Self::snapshot(ctx)?,
        };
        let report = self.channel.publish(&event);
        debug!(
            building_id = self.id,
            sensors = event.status.len(),
            delivered = report.delivered,
            missed = report.missed,
            pruned = report.pruned,
            "Published building status"
        );
        Ok(())
    }
}

fn schedule_delta(field: &str, ms: i64) -> Result<TimeDelta, EntityError> {
    TimeDelta::try_milliseconds(ms).ok_or_else(|| EntityError::InvalidSchedule {
        name: PUBLISH_STATUS_REMINDER.to_string(),
        reason: format!("{} of {}ms is out of range", field, ms),
    })
}

#[async_trait]
impl Entity for BuildingEntity {
    const KIND: EntityKind = EntityKind::Building;

    type Id = i64;
    type Request = BuildingRequest;
    type Reply = BuildingReply;

    async fn on_activate(&mut self, ctx: &mut EntityContext) -> Result<(), EntityError> {
        let due_time = schedule_delta("due time", self.schedule.due_time_ms)?;
        let period = schedule_delta("period", self.schedule.period_ms)?;
        ctx.register_reminder(PUBLISH_STATUS_REMINDER, due_time, period)
            .await
    }

    async fn handle(
        &mut self,
        ctx: &mut EntityContext,
        request: BuildingRequest,
    ) -> Result<BuildingReply, EntityError> {
        match request {
            BuildingRequest::ReportSensorStatus { sensor_id, value } => {
                let value = EntityError::check_finite(&sensor_id, value)?;
                ctx.set(&sensor_id, &value).await?;
                debug!(building_id = self.id, sensor_id = %sensor_id, value = value, "Sensor status reported");
                Ok(BuildingReply::Reported)
            }
            BuildingRequest::Subscribe(handle) => {
                let added = self.channel.subscribe(handle);
                Ok(BuildingReply::Subscription(added))
            }
            BuildingRequest::Unsubscribe(id) => {
                let removed = self.channel.unsubscribe(&id);
                Ok(BuildingReply::Subscription(removed))
            }
            BuildingRequest::Status => Ok(BuildingReply::Status(Self::snapshot(ctx)?)),
            BuildingRequest::SubscriberCount => {
                Ok(BuildingReply::Subscribers(self.subscriber_count()))
            }
        }
    }

    async fn on_reminder(&mut self, ctx: &mut EntityContext, name: &str) -> Result<(), EntityError> {
        if name != PUBLISH_STATUS_REMINDER {
            warn!(building_id = self.id, reminder = %name, "Unknown reminder, ignoring");
            return Ok(());
        }
        self.publish_status(ctx)
    }

    async fn on_deactivate(&mut self, _ctx: &mut EntityContext) {
        if !self.channel.is_empty() {
            info!(
                building_id = self.id,
                subscribers = self.channel.len(),
                "Dropping building subscribers on deactivation"
            );
        }
    }
}
