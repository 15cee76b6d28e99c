use crate::building::StatusReported;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Client → Server message types
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Ask for the building's current status outside the publish schedule
    #[serde(rename = "status")]
    Status,
}

/// Server → Client: building status snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReportedMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub building_id: i64,
    pub status: BTreeMap<String, f64>,
}

impl From<StatusReported> for StatusReportedMessage {
    fn from(event: StatusReported) -> Self {
        Self {
            msg_type: "status_reported".to_string(),
            building_id: event.building_id,
            status: event.status,
        }
    }
}

/// Server → Client: Error message
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub error: String,
}

impl ErrorMessage {
    pub fn new(error: String) -> Self {
        Self {
            msg_type: "error".to_string(),
            error,
        }
    }
}
