use crate::api::error::parse_building_id;
use crate::api::ApiError;
use crate::hub::SensorHub;
use crate::subscription::ConnectionManager;
use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::info;

/// GET /api/buildings/:id/events - Stream status snapshots over a WebSocket
///
/// The subscription is taken before the upgrade so entity errors still map
/// to HTTP statuses. If the upgrade then fails, the dropped receiver gets
/// pruned on the next publish.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<SensorHub>>,
    Path(building_id): Path<String>,
) -> Result<Response, ApiError> {
    let building_id = parse_building_id(&building_id)?;
    let (subscription_id, events) = hub.subscribe(building_id).await?;
    info!(building_id = building_id, subscription = %subscription_id, "WebSocket upgrade request received");

    let manager = ConnectionManager::new(hub, building_id, subscription_id);
    Ok(ws.on_upgrade(move |socket| manager.handle(socket, events)))
}

pub fn create_ws_router(hub: Arc<SensorHub>) -> Router {
    Router::new()
        .route("/api/buildings/:id/events", get(ws_handler))
        .with_state(hub)
}
