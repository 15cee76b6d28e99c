// Integration tests for the SensorHub facade

use chrono::{TimeDelta, Utc};
use futures::future::join_all;
use sensorhub::config::HubConfig;
use sensorhub::runtime::{EntityKind, SqliteStateStore};
use sensorhub::{EntityError, SensorHub};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

fn config(due_ms: i64, period_ms: i64) -> HubConfig {
    let mut config = HubConfig::default();
    config.storage.database_path = ":memory:".to_string();
    config.building.reminder_due_ms = due_ms;
    config.building.reminder_period_ms = period_ms;
    config
}

/// Hub whose publish reminder stays out of the way unless triggered by hand.
fn quiet_hub() -> Arc<SensorHub> {
    SensorHub::open(&config(600_000, 600_000)).unwrap()
}

#[tokio::test]
async fn test_sensor_keeps_ten_most_recent_readings() {
    let hub = quiet_hub();
    let start = Utc::now();

    for i in 0..15 {
        hub.update_sensor("temp-1", i as f64, start + TimeDelta::seconds(i))
            .await
            .unwrap();
    }

    let state = hub.sensor_readings("temp-1").await.unwrap();
    assert_eq!(state.len(), 10);
    assert_eq!(state.latest().unwrap().value, 14.0);
    assert_eq!(hub.sensor_average("temp-1").await.unwrap(), Some(9.5));
}

#[tokio::test]
async fn test_report_last_write_wins() {
    let hub = quiet_hub();

    hub.report_sensor_status(1, "s1", 20.0).await.unwrap();
    hub.report_sensor_status(1, "s1", 23.0).await.unwrap();

    let status = hub.building_status(1).await.unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status["s1"], 23.0);
}

#[tokio::test]
async fn test_buildings_are_disjoint() {
    let hub = quiet_hub();

    hub.report_sensor_status(1, "s1", 20.0).await.unwrap();
    hub.report_sensor_status(2, "s2", 30.0).await.unwrap();

    let first = hub.building_status(1).await.unwrap();
    let second = hub.building_status(2).await.unwrap();
    assert_eq!(first.keys().collect::<Vec<_>>(), vec!["s1"]);
    assert_eq!(second.keys().collect::<Vec<_>>(), vec!["s2"]);
}

#[tokio::test]
async fn test_subscribe_publish_unsubscribe_publish() {
    let hub = quiet_hub();
    hub.report_sensor_status(1, "s1", 20.0).await.unwrap();
    let (handle_id, mut events) = hub.subscribe(1).await.unwrap();

    hub.publish_now(1).await.unwrap();
    assert!(hub.unsubscribe(1, handle_id).await.unwrap());
    hub.publish_now(1).await.unwrap();

    let event = events.try_recv().unwrap();
    assert_eq!(event.building_id, 1);
    assert_eq!(event.status["s1"], 20.0);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_non_finite_values_leave_entities_usable() {
    let hub = quiet_hub();
    hub.update_sensor("temp-1", 20.0, Utc::now()).await.unwrap();
    hub.report_sensor_status(1, "s1", 20.0).await.unwrap();

    let err = hub
        .update_sensor("temp-1", f64::INFINITY, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, EntityError::InvalidValue { .. }));
    let err = hub.report_sensor_status(1, "s2", f64::NAN).await.unwrap_err();
    assert!(matches!(err, EntityError::InvalidValue { .. }));

    assert_eq!(hub.sensor_average("temp-1").await.unwrap(), Some(20.0));
    assert_eq!(hub.building_status(1).await.unwrap().len(), 1);
    hub.publish_now(1).await.unwrap();
}

#[tokio::test]
async fn test_subscriber_count_follows_subscriptions() {
    let hub = quiet_hub();
    assert_eq!(hub.subscriber_count(1).await.unwrap(), 0);

    let (first, _first_events) = hub.subscribe(1).await.unwrap();
    let (_second, _second_events) = hub.subscribe(1).await.unwrap();
    assert_eq!(hub.subscriber_count(1).await.unwrap(), 2);

    hub.unsubscribe(1, first).await.unwrap();
    assert_eq!(hub.subscriber_count(1).await.unwrap(), 1);
    assert_eq!(hub.subscriber_count(2).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unsubscribe_twice_is_noop() {
    let hub = quiet_hub();
    let (handle_id, _events) = hub.subscribe(1).await.unwrap();

    assert!(hub.unsubscribe(1, handle_id).await.unwrap());
    assert!(!hub.unsubscribe(1, handle_id).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reports_are_not_lost() {
    let hub = quiet_hub();

    let reports = (0..32).map(|i| {
        let hub = Arc::clone(&hub);
        async move { hub.report_sensor_status(9, &format!("s{}", i), i as f64).await }
    });
    for result in join_all(reports).await {
        result.unwrap();
    }

    let status = hub.building_status(9).await.unwrap();
    assert_eq!(status.len(), 32);
    assert_eq!(status["s31"], 31.0);
}

#[tokio::test]
async fn test_reminder_delivers_exactly_one_event_per_period() {
    let hub = SensorHub::open(&config(300, 60_000)).unwrap();
    let (_id, mut events) = hub.subscribe(1).await.unwrap();

    hub.report_sensor_status(1, "s1", 20.0).await.unwrap();
    hub.report_sensor_status(1, "s2", 21.0).await.unwrap();

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("status never published")
        .unwrap();
    assert_eq!(event.status.len(), 2);
    assert_eq!(event.status["s1"], 20.0);
    assert_eq!(event.status["s2"], 21.0);

    sleep(Duration::from_millis(500)).await;
    assert!(events.try_recv().is_err());
    hub.shutdown().await;
}

#[tokio::test]
async fn test_non_positive_period_rejects_building() {
    let hub = SensorHub::open(&config(1000, 0)).unwrap();

    let err = hub.report_sensor_status(1, "s1", 20.0).await.unwrap_err();

    assert!(matches!(err, EntityError::InvalidSchedule { .. }));
    assert!(!err.is_retryable());
    assert_eq!(hub.scheduler().active_count(), 0);
    assert!(!hub
        .scheduler()
        .is_registered(EntityKind::Building, "1", "PublishBuildingStatus"));
}

#[tokio::test]
async fn test_building_deactivation_keeps_status_and_drops_subscribers() {
    let hub = quiet_hub();
    hub.report_sensor_status(1, "s1", 20.0).await.unwrap();
    let (_id, mut events) = hub.subscribe(1).await.unwrap();

    assert!(hub.buildings().deactivate(&1).await);

    // Subscriber set is in-memory only
    let closed = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
    assert!(closed.is_none());
    assert_eq!(hub.building_status(1).await.unwrap()["s1"], 20.0);
}

#[tokio::test]
async fn test_shutdown_makes_entities_unavailable() {
    let hub = SensorHub::new(
        &config(600_000, 600_000),
        Arc::new(SqliteStateStore::in_memory().unwrap()),
    );
    hub.update_sensor("temp-1", 20.0, Utc::now()).await.unwrap();

    hub.shutdown().await;

    let err = hub.sensor_readings("temp-1").await.unwrap_err();
    assert!(matches!(err, EntityError::Unavailable { .. }));
    assert!(err.is_retryable());
}
