// Entity runtime: serialized per-entity access, durable state, reminders

mod context;
mod entity;
mod host;
mod reminder;
mod store;

pub use context::EntityContext;
pub use entity::{Entity, EntityId};
pub use host::{ActivationPhase, EntityHost};
pub use reminder::{ReminderRecord, ReminderScheduler, ReminderTarget, MAX_SCHEDULE_MS};
pub use store::{SqliteStateStore, StateStore};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Entity type tag. Entity IDs are unique only within a kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Sensor,
    Building,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Sensor => "sensor",
            EntityKind::Building => "building",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sensor" => Ok(EntityKind::Sensor),
            "building" => Ok(EntityKind::Building),
            other => anyhow::bail!("unknown entity kind '{}'", other),
        }
    }
}
