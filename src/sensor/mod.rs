// Sensor entity: bounded reading history per physical sensor

mod state;

pub use state::{SensorReading, SensorState, DEFAULT_MAX_READINGS};

use crate::error::EntityError;
use crate::runtime::{Entity, EntityContext, EntityKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

/// State key holding the serialized [`SensorState`]
const READINGS_KEY: &str = "readings";

/// Operations a sensor accepts.
#[derive(Debug)]
pub enum SensorRequest {
    Update {
        value: f64,
        timestamp: DateTime<Utc>,
    },
    Readings,
}

#[derive(Debug)]
pub enum SensorReply {
    Updated,
    Readings(SensorState),
}

/// Purely reactive entity; registers no reminders.
pub struct SensorEntity {
    max_readings: usize,
}

impl SensorEntity {
    pub fn new(max_readings: usize) -> Self {
        Self { max_readings }
    }
}

impl Default for SensorEntity {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_READINGS)
    }
}

#[async_trait]
impl Entity for SensorEntity {
    const KIND: EntityKind = EntityKind::Sensor;

    type Id = String;
    type Request = SensorRequest;
    type Reply = SensorReply;

    async fn handle(
        &mut self,
        ctx: &mut EntityContext,
        request: SensorRequest,
    ) -> Result<SensorReply, EntityError> {
        let mut state: SensorState = ctx.get(READINGS_KEY)?.unwrap_or_default();

        match request {
            SensorRequest::Update { value, timestamp } => {
                let value = EntityError::check_finite(ctx.entity_id(), value)?;
                state.add_reading(value, timestamp, self.max_readings);
                ctx.set(READINGS_KEY, &state).await?;
                debug!(
                    sensor_id = %ctx.entity_id(),
                    value = value,
                    retained = state.len(),
                    "Sensor reading recorded"
                );
                Ok(SensorReply::Updated)
            }
            SensorRequest::Readings => Ok(SensorReply::Readings(state)),
        }
    }
}
