use crate::api::ApiError;
use crate::hub::SensorHub;
use crate::sensor::SensorReading;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Reading submitted by a device
#[derive(Deserialize)]
struct ReadingRequest {
    value: f64,
    /// Defaults to the time the request is handled
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadingsResponse {
    sensor_id: String,
    readings: Vec<SensorReading>,
    average: Option<f64>,
}

pub fn create_sensor_router(hub: Arc<SensorHub>) -> Router {
    Router::new()
        .route(
            "/api/sensors/:id/readings",
            post(record_reading).get(get_readings),
        )
        .with_state(hub)
}

/// POST /api/sensors/:id/readings - Record one reading
async fn record_reading(
    State(hub): State<Arc<SensorHub>>,
    Path(sensor_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let request: ReadingRequest =
        serde_json::from_slice(&body).map_err(|e| ApiError::ValidationError(e.to_string()))?;
    let timestamp = request.timestamp.unwrap_or_else(Utc::now);

    debug!(sensor_id = %sensor_id, value = request.value, "Recording sensor reading");
    hub.update_sensor(&sensor_id, request.value, timestamp)
        .await?;

    Ok(StatusCode::ACCEPTED)
}

/// GET /api/sensors/:id/readings - Retained history, most recent first
async fn get_readings(
    State(hub): State<Arc<SensorHub>>,
    Path(sensor_id): Path<String>,
) -> Result<Json<ReadingsResponse>, ApiError> {
    let state = hub.sensor_readings(&sensor_id).await?;

    Ok(Json(ReadingsResponse {
        average: state.average(),
        readings: state.readings().cloned().collect(),
        sensor_id,
    }))
}
