use crate::api::error::parse_building_id;
use crate::api::ApiError;
use crate::hub::SensorHub;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Deserialize)]
struct SensorStatusRequest {
    value: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    building_id: i64,
    status: BTreeMap<String, f64>,
}

pub fn create_building_router(hub: Arc<SensorHub>) -> Router {
    Router::new()
        .route(
            "/api/buildings/:id/sensors/:sensor_id",
            put(report_sensor_status),
        )
        .route("/api/buildings/:id/status", get(get_status))
        .with_state(hub)
}

/// PUT /api/buildings/:id/sensors/:sensor_id - Record a sensor's latest value
async fn report_sensor_status(
    State(hub): State<Arc<SensorHub>>,
    Path((building_id, sensor_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let building_id = parse_building_id(&building_id)?;
    let request: SensorStatusRequest =
        serde_json::from_slice(&body).map_err(|e| ApiError::ValidationError(e.to_string()))?;

    hub.report_sensor_status(building_id, &sensor_id, request.value)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/buildings/:id/status - Current sensor values
async fn get_status(
    State(hub): State<Arc<SensorHub>>,
    Path(building_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let building_id = parse_building_id(&building_id)?;
    let status = hub.building_status(building_id).await?;

    Ok(Json(StatusResponse {
        building_id,
        status,
    }))
}
