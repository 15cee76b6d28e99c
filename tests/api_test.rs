// Integration tests for the sensor and building HTTP routes

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use sensorhub::api::create_router;
use sensorhub::config::HubConfig;
use sensorhub::SensorHub;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn test_hub(period_ms: i64) -> Arc<SensorHub> {
    let mut config = HubConfig::default();
    config.storage.database_path = ":memory:".to_string();
    config.building.reminder_due_ms = 600_000;
    config.building.reminder_period_ms = period_ms;
    SensorHub::open(&config).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_post_reading_then_get_history() {
    let app = create_router(test_hub(600_000));

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/sensors/temp-1/readings",
            json!({"value": 18.0, "timestamp": "2024-01-01T00:00:00Z"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = send(
        &app,
        json_request("POST", "/api/sensors/temp-1/readings", json!({"value": 22.0})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send(&app, get_request("/api/sensors/temp-1/readings")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sensorId"], "temp-1");
    assert_eq!(body["average"], 20.0);
    let readings = body["readings"].as_array().unwrap();
    assert_eq!(readings.len(), 2);
    assert_eq!(readings[0]["value"], 22.0);
    assert_eq!(readings[1]["value"], 18.0);
}

#[tokio::test]
async fn test_unknown_sensor_has_no_average() {
    let app = create_router(test_hub(600_000));

    let (status, body) = send(&app, get_request("/api/sensors/nobody/readings")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["readings"], json!([]));
    assert_eq!(body["average"], Value::Null);
}

#[tokio::test]
async fn test_invalid_reading_body_returns_400() {
    let app = create_router(test_hub(600_000));

    let (status, body) = send(
        &app,
        json_request("POST", "/api/sensors/temp-1/readings", json!({"value": "warm"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_report_sensor_status_then_get_status() {
    let app = create_router(test_hub(600_000));

    let (status, _) = send(
        &app,
        json_request("PUT", "/api/buildings/3/sensors/s1", json!({"value": 20.5})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, get_request("/api/buildings/3/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"buildingId": 3, "status": {"s1": 20.5}}));
}

#[tokio::test]
async fn test_non_numeric_building_id_returns_400() {
    let app = create_router(test_hub(600_000));

    let (status, body) = send(&app, get_request("/api/buildings/hq/status")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("hq"));
}

#[tokio::test]
async fn test_invalid_schedule_returns_400() {
    let app = create_router(test_hub(0));

    let (status, body) = send(&app, get_request("/api/buildings/1/status")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("PublishBuildingStatus"));
}

#[tokio::test]
async fn test_unavailable_returns_503_with_retry_after() {
    let hub = test_hub(600_000);
    let app = create_router(Arc::clone(&hub));
    hub.shutdown().await;

    let response = app
        .oneshot(get_request("/api/buildings/1/status"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn test_cors_preflight_is_allowed() {
    let app = create_router(test_hub(600_000));

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/buildings/1/status")
                .header("Origin", "http://dashboard.local")
                .header("Access-Control-Request-Method", "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}
