//! Ingestion pipeline integration tests.
//!
//! Drives the pipeline end to end against the in-memory store and, where
//! persistence matters, a real SQLite database.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dronewatch_core::{DangerClassifier, GeoPoint, MalformedMessage, NoFlyZone};
use dronewatch_service::persistence::{drones as drones_db, init_database, zones as zones_db, Database};
use dronewatch_service::stats::IngestStats;
use dronewatch_service::zones::{DatabaseZones, StaticZones, ZoneCache, ZoneSource};
use dronewatch_service::{DroneStore, IngestError, IngestPipeline};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};

const ALPHA_REASON: &str =
    "Flying higher than 500 meters and Moving faster than 10 m/s and Entering no fly zone: Alpha";

fn alpha_zone() -> NoFlyZone {
    NoFlyZone::new(
        "Alpha",
        vec![
            GeoPoint::new(35.80, 31.95),
            GeoPoint::new(35.86, 31.95),
            GeoPoint::new(35.86, 32.00),
            GeoPoint::new(35.80, 32.00),
            GeoPoint::new(35.80, 31.95),
        ],
    )
}

fn telemetry(longitude: f64, latitude: f64, height: f64, speed: f64) -> Value {
    json!({
        "longitude": longitude,
        "latitude": latitude,
        "height": height,
        "horizontal_speed": speed,
    })
}

fn at(seconds: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(seconds as i64)
}

fn pipeline_with(source: Box<dyn ZoneSource>, db: Option<Database>) -> IngestPipeline {
    let stats = Arc::new(IngestStats::default());
    let zones = Arc::new(ZoneCache::new(
        source,
        Duration::from_secs(30),
        Duration::from_millis(250),
        stats.clone(),
    ));
    let pipeline = IngestPipeline::new(
        Arc::new(DroneStore::new()),
        zones,
        DangerClassifier::default(),
        stats,
    );
    match db {
        Some(db) => pipeline.with_database(db),
        None => pipeline,
    }
}

fn pipeline(zones: Vec<NoFlyZone>) -> IngestPipeline {
    pipeline_with(Box::new(StaticZones::new(zones)), None)
}

#[tokio::test]
async fn test_height_over_limit_is_dangerous() {
    let pipeline = pipeline(vec![]);

    pipeline
        .ingest("Drone_01", &telemetry(35.9, 31.9, 501.0, 5.0))
        .await
        .unwrap();
    pipeline
        .ingest("Drone_02", &telemetry(35.9, 31.9, 500.0, 5.0))
        .await
        .unwrap();

    let high = pipeline.store().get_by_serial("Drone_01").unwrap();
    assert!(high.is_dangerous);
    assert_eq!(high.dangerous_reason.as_deref(), Some("Flying higher than 500 meters"));

    let at_limit = pipeline.store().get_by_serial("Drone_02").unwrap();
    assert!(!at_limit.is_dangerous);
    assert_eq!(at_limit.dangerous_reason, None);
}

#[tokio::test]
async fn test_speed_over_limit_is_dangerous() {
    let pipeline = pipeline(vec![]);

    pipeline
        .ingest("Drone_02", &telemetry(35.9, 31.9, 100.0, 16.0))
        .await
        .unwrap();

    let drone = pipeline.store().get_by_serial("Drone_02").unwrap();
    assert!(drone.is_dangerous);
    assert_eq!(drone.dangerous_reason.as_deref(), Some("Moving faster than 10 m/s"));
}

#[tokio::test]
async fn test_no_fly_zone_entry_names_the_zone() {
    let pipeline = pipeline(vec![alpha_zone()]);

    pipeline
        .ingest("Drone_03", &telemetry(35.83, 31.97, 100.0, 5.0))
        .await
        .unwrap();
    pipeline
        .ingest("Drone_04", &telemetry(35.70, 31.97, 100.0, 5.0))
        .await
        .unwrap();

    let inside = pipeline.store().get_by_serial("Drone_03").unwrap();
    assert_eq!(
        inside.dangerous_reason.as_deref(),
        Some("Entering no fly zone: Alpha")
    );

    let outside = pipeline.store().get_by_serial("Drone_04").unwrap();
    assert!(!outside.is_dangerous);
}

#[tokio::test]
async fn test_all_reasons_are_combined_in_order() {
    let pipeline = pipeline(vec![alpha_zone()]);

    pipeline
        .ingest("Drone_05", &telemetry(35.83, 31.97, 501.0, 16.0))
        .await
        .unwrap();

    let drone = pipeline.store().get_by_serial("Drone_05").unwrap();
    assert!(drone.is_dangerous);
    assert_eq!(drone.dangerous_reason.as_deref(), Some(ALPHA_REASON));
}

#[tokio::test]
async fn test_later_safe_message_clears_danger() {
    let pipeline = pipeline(vec![]);

    pipeline
        .ingest_at("Drone_01", &telemetry(35.9, 31.9, 700.0, 5.0), at(0))
        .await
        .unwrap();
    pipeline
        .ingest_at("Drone_01", &telemetry(35.9, 31.9, 120.0, 5.0), at(1))
        .await
        .unwrap();

    let drone = pipeline.store().get_by_serial("Drone_01").unwrap();
    assert!(!drone.is_dangerous);
    assert_eq!(drone.last_height, 120.0);
    assert_eq!(drone.created_at, at(0));
    assert_eq!(drone.last_seen, at(1));
}

#[tokio::test]
async fn test_reingesting_identical_message_is_idempotent_on_state() {
    let pipeline = pipeline(vec![alpha_zone()]);
    let payload = telemetry(35.83, 31.97, 501.0, 16.0);

    pipeline.ingest_at("Drone_01", &payload, at(0)).await.unwrap();
    let first = pipeline.store().get_by_serial("Drone_01").unwrap();
    pipeline.ingest_at("Drone_01", &payload, at(0)).await.unwrap();
    let second = pipeline.store().get_by_serial("Drone_01").unwrap();

    assert_eq!(first, second);
    assert_eq!(pipeline.store().get_history("Drone_01").len(), 2);
}

#[tokio::test]
async fn test_malformed_message_leaves_state_untouched() {
    let pipeline = pipeline(vec![]);

    pipeline
        .ingest_at("Drone_01", &telemetry(35.9, 31.9, 100.0, 5.0), at(0))
        .await
        .unwrap();

    let missing_height = json!({"longitude": 35.0, "latitude": 31.0, "horizontal_speed": 99.0});
    let err = pipeline
        .ingest_at("Drone_01", &missing_height, at(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Malformed(MalformedMessage::MissingField("height"))
    ));

    let stringly = json!({"longitude": "35.0", "latitude": 31.0, "height": 1.0, "horizontal_speed": 1.0});
    assert!(pipeline.ingest_at("Drone_01", &stringly, at(1)).await.is_err());

    let off_the_map = telemetry(200.0, 31.0, 1.0, 1.0);
    assert!(pipeline.ingest_at("Drone_01", &off_the_map, at(1)).await.is_err());

    let drone = pipeline.store().get_by_serial("Drone_01").unwrap();
    assert_eq!(drone.last_height, 100.0);
    assert_eq!(drone.last_seen, at(0));
    assert_eq!(pipeline.store().get_history("Drone_01").len(), 1);

    pipeline
        .ingest_at("Drone_01", &telemetry(35.9, 31.9, 110.0, 5.0), at(2))
        .await
        .unwrap();
    assert_eq!(pipeline.store().get_history("Drone_01").len(), 2);

    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.rejected_malformed, 3);
}

#[tokio::test]
async fn test_clock_going_backwards_keeps_history_ordered() {
    let pipeline = pipeline(vec![]);

    pipeline
        .ingest_at("Drone_01", &telemetry(35.9, 31.9, 100.0, 5.0), at(10))
        .await
        .unwrap();
    pipeline
        .ingest_at("Drone_01", &telemetry(35.9, 31.9, 110.0, 5.0), at(5))
        .await
        .unwrap();

    let history = pipeline.store().get_history("Drone_01");
    assert!(history[0].timestamp <= history[1].timestamp);
    assert_eq!(pipeline.store().get_by_serial("Drone_01").unwrap().last_height, 110.0);
}

#[tokio::test]
async fn test_store_failure_leaves_memory_untouched() {
    let db = init_database(":memory:", 1).await.unwrap();
    let pipeline = pipeline_with(Box::new(StaticZones::default()), Some(db.clone()));

    pipeline
        .ingest_at("Drone_01", &telemetry(35.9, 31.9, 100.0, 5.0), at(0))
        .await
        .unwrap();

    db.close().await;
    let err = pipeline
        .ingest_at("Drone_01", &telemetry(35.9, 31.9, 900.0, 5.0), at(1))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Store(_)));
    assert!(err.is_retryable());

    let drone = pipeline.store().get_by_serial("Drone_01").unwrap();
    assert_eq!(drone.last_height, 100.0);
    assert!(!drone.is_dangerous);
    assert_eq!(pipeline.store().get_history("Drone_01").len(), 1);
    assert_eq!(pipeline.stats().snapshot().store_write_failures, 1);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let path = std::env::temp_dir()
        .join(format!("dronewatch-test-{}.db", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .to_string();

    {
        let db = init_database(&path, 2).await.unwrap();
        let pipeline = pipeline_with(Box::new(StaticZones::default()), Some(db.clone()));
        pipeline
            .ingest_at("Drone_01", &telemetry(35.9, 31.9, 100.0, 5.0), at(0))
            .await
            .unwrap();
        pipeline
            .ingest_at("Drone_01", &json!({
                "longitude": 35.91, "latitude": 31.91, "height": 650.0,
                "horizontal_speed": 5.0, "battery": 81
            }), at(1))
            .await
            .unwrap();
        db.close().await;
    }

    let db = init_database(&path, 2).await.unwrap();
    let store = DroneStore::new();
    let restored = drones_db::hydrate_store(db.pool(), &store).await.unwrap();
    assert_eq!(restored, 1);

    let drone = store.get_by_serial("Drone_01").unwrap();
    assert_eq!(drone.created_at, at(0));
    assert_eq!(drone.last_seen, at(1));
    assert_eq!(drone.last_location, GeoPoint::new(35.91, 31.91));
    assert!(drone.is_dangerous);
    assert_eq!(drone.dangerous_reason.as_deref(), Some("Flying higher than 500 meters"));

    let history = store.get_history("Drone_01");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].timestamp, at(0));
    assert_eq!(history[1].raw_payload["battery"], json!(81));

    db.close().await;
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_zones_are_read_from_database() {
    let db = init_database(":memory:", 1).await.unwrap();
    zones_db::upsert_zone(db.pool(), &alpha_zone()).await.unwrap();

    let pipeline = pipeline_with(Box::new(DatabaseZones::new(db.clone())), Some(db));
    pipeline
        .ingest("Drone_03", &telemetry(35.83, 31.97, 100.0, 5.0))
        .await
        .unwrap();

    let drone = pipeline.store().get_by_serial("Drone_03").unwrap();
    assert_eq!(
        drone.dangerous_reason.as_deref(),
        Some("Entering no fly zone: Alpha")
    );
}

struct StalledZones;

impl ZoneSource for StalledZones {
    fn describe(&self) -> String {
        "stalled".to_string()
    }

    fn load(&self) -> BoxFuture<'_, anyhow::Result<Vec<NoFlyZone>>> {
        async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![alpha_zone()])
        }
        .boxed()
    }
}

#[tokio::test(start_paused = true)]
async fn test_zone_timeout_classifies_without_zones() {
    let pipeline = pipeline_with(Box::new(StalledZones), None);

    pipeline
        .ingest("Drone_03", &telemetry(35.83, 31.97, 501.0, 5.0))
        .await
        .unwrap();

    let drone = pipeline.store().get_by_serial("Drone_03").unwrap();
    assert_eq!(
        drone.dangerous_reason.as_deref(),
        Some("Flying higher than 500 meters")
    );
    assert_eq!(pipeline.stats().snapshot().zone_lookups_degraded, 1);
}
