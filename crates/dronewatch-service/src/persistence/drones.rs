//! Drone state and observation history persistence.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use dronewatch_core::{DroneState, GeoPoint, Observation};
use sqlx::{Sqlite, SqlitePool};

use crate::state::{DroneStore, DroneUpdate};

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp {raw:?}"))
}

/// Write one accepted message: the drone upsert and its observation row,
/// committed together or not at all.
pub async fn record_observation(
    pool: &SqlitePool,
    update: &DroneUpdate,
    observation: &Observation,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    upsert_drone_tx(&mut tx, update).await?;
    insert_observation_tx(&mut tx, observation).await?;
    tx.commit().await?;
    Ok(())
}

/// Upsert a drone state within an existing transaction.
///
/// `created_at` is only written when the row is first inserted.
pub async fn upsert_drone_tx(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    update: &DroneUpdate,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO drones (serial_number, created_at, last_seen, longitude, latitude, last_height, last_speed, is_dangerous, dangerous_reason)
        VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(serial_number) DO UPDATE SET
            last_seen = ?2,
            longitude = ?3, latitude = ?4,
            last_height = ?5, last_speed = ?6,
            is_dangerous = ?7, dangerous_reason = ?8
        "#,
    )
    .bind(&update.serial_number)
    .bind(format_ts(&update.timestamp))
    .bind(update.location.longitude)
    .bind(update.location.latitude)
    .bind(update.height)
    .bind(update.speed)
    .bind(update.assessment.is_dangerous)
    .bind(&update.assessment.reason)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Append an observation within an existing transaction.
pub async fn insert_observation_tx(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    observation: &Observation,
) -> Result<()> {
    let raw_payload = serde_json::to_string(&observation.raw_payload)?;
    sqlx::query(
        r#"
        INSERT INTO observations (serial_number, timestamp, longitude, latitude, height, horizontal_speed, raw_payload)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&observation.serial_number)
    .bind(format_ts(&observation.timestamp))
    .bind(observation.location.longitude)
    .bind(observation.location.latitude)
    .bind(observation.height)
    .bind(observation.horizontal_speed)
    .bind(raw_payload)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Load all drones from the database.
pub async fn load_all_drones(pool: &SqlitePool) -> Result<Vec<DroneState>> {
    let rows = sqlx::query_as::<_, DroneRow>(
        "SELECT serial_number, created_at, last_seen, longitude, latitude, last_height, last_speed, is_dangerous, dangerous_reason FROM drones",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(DroneState::try_from).collect()
}

/// Load every observation in insertion order.
pub async fn load_all_observations(pool: &SqlitePool) -> Result<Vec<Observation>> {
    let rows = sqlx::query_as::<_, ObservationRow>(
        "SELECT serial_number, timestamp, longitude, latitude, height, horizontal_speed, raw_payload FROM observations ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Observation::try_from).collect()
}

/// Replace the in-memory store with what the database holds.
///
/// Returns the number of drones restored.
pub async fn hydrate_store(pool: &SqlitePool, store: &DroneStore) -> Result<usize> {
    let states = load_all_drones(pool).await?;
    let observations = load_all_observations(pool).await?;
    let drone_count = states.len();
    let observation_count = observations.len();

    let orphaned = store.restore(states, observations);
    if orphaned > 0 {
        tracing::warn!("Skipped {} observations without a drone row", orphaned);
    }
    tracing::info!(
        "Restored {} drones and {} observations from database",
        drone_count,
        observation_count - orphaned
    );
    Ok(drone_count)
}

// Internal row types for SQLx
#[derive(sqlx::FromRow)]
struct DroneRow {
    serial_number: String,
    created_at: String,
    last_seen: String,
    longitude: f64,
    latitude: f64,
    last_height: f64,
    last_speed: f64,
    is_dangerous: bool,
    dangerous_reason: Option<String>,
}

impl TryFrom<DroneRow> for DroneState {
    type Error = anyhow::Error;

    fn try_from(row: DroneRow) -> Result<Self> {
        Ok(DroneState {
            created_at: parse_ts(&row.created_at)?,
            last_seen: parse_ts(&row.last_seen)?,
            serial_number: row.serial_number,
            last_location: GeoPoint::new(row.longitude, row.latitude),
            last_height: row.last_height,
            last_speed: row.last_speed,
            is_dangerous: row.is_dangerous,
            dangerous_reason: row.dangerous_reason,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ObservationRow {
    serial_number: String,
    timestamp: String,
    longitude: f64,
    latitude: f64,
    height: f64,
    horizontal_speed: f64,
    raw_payload: String,
}

impl TryFrom<ObservationRow> for Observation {
    type Error = anyhow::Error;

    fn try_from(row: ObservationRow) -> Result<Self> {
        Ok(Observation {
            timestamp: parse_ts(&row.timestamp)?,
            raw_payload: serde_json::from_str(&row.raw_payload)?,
            serial_number: row.serial_number,
            location: GeoPoint::new(row.longitude, row.latitude),
            height: row.height,
            horizontal_speed: row.horizontal_speed,
        })
    }
}
