// HTTP and WebSocket APIs

mod buildings;
mod error;
mod sensors;
pub mod websocket;

pub use buildings::create_building_router;
pub use error::ApiError;
pub use sensors::create_sensor_router;
pub use websocket::{create_ws_router, ws_handler};

use crate::hub::SensorHub;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Full API: sensor and building routes plus the event WebSocket.
pub fn create_router(hub: Arc<SensorHub>) -> Router {
    Router::new()
        .merge(create_sensor_router(Arc::clone(&hub)))
        .merge(create_building_router(Arc::clone(&hub)))
        .merge(create_ws_router(hub))
        .layer(CorsLayer::permissive())
}
