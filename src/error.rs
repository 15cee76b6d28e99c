use crate::runtime::EntityKind;
use thiserror::Error;

/// Errors surfaced to callers of entity operations.
///
/// Delivery failures to individual subscribers stay inside the event channel
/// (see [`crate::channel::DeliveryFailure`]).
#[derive(Debug, Error)]
pub enum EntityError {
    /// Reminder schedule rejected before anything was registered.
    #[error("invalid schedule for reminder '{name}': {reason}")]
    InvalidSchedule { name: String, reason: String },

    /// Request carried a value that cannot be stored, such as NaN or infinity.
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    /// Target entity could not be activated or reached. Callers may retry with backoff.
    #[error("{kind} entity '{entity_id}' is unavailable: {reason}")]
    Unavailable {
        kind: EntityKind,
        entity_id: String,
        reason: String,
    },

    /// Durable store rejected a read or write. Prior durable state is intact.
    #[error("state persistence failed: {0:#}")]
    Persistence(anyhow::Error),

    /// A state value could not be converted to or from its stored JSON form.
    #[error("state entry '{key}' could not be (de)serialized: {source}")]
    StateCodec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} entity answered with an unexpected reply")]
    UnexpectedReply { kind: EntityKind },
}

impl EntityError {
    pub(crate) fn unavailable(
        kind: EntityKind,
        entity_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Unavailable {
            kind,
            entity_id: entity_id.into(),
            reason: reason.into(),
        }
    }

    /// Reject readings JSON cannot represent. `serde_json` would store them as null.
    pub(crate) fn check_finite(key: &str, value: f64) -> Result<f64, Self> {
        if value.is_finite() {
            Ok(value)
        } else {
            Err(Self::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a finite number, got {}", value),
            })
        }
    }

    /// True when retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Persistence(_))
    }
}
