//! No-fly zone reference data.
//!
//! The `no_fly_zones` table is provisioned by an external collaborator. The
//! service only reads it; `upsert_zone` exists for provisioning tools and tests.

use anyhow::Result;
use dronewatch_core::{GeoPoint, NoFlyZone};
use sqlx::SqlitePool;

/// Insert or replace a zone. Polygon vertices are stored as `[[lon, lat], ...]`.
pub async fn upsert_zone(pool: &SqlitePool, zone: &NoFlyZone) -> Result<()> {
    let ring: Vec<[f64; 2]> = zone.polygon.iter().map(|p| p.to_lon_lat()).collect();
    let polygon_json = serde_json::to_string(&ring)?;

    sqlx::query(
        r#"
        INSERT INTO no_fly_zones (name, polygon) VALUES (?1, ?2)
        ON CONFLICT(name) DO UPDATE SET polygon = ?2
        "#,
    )
    .bind(&zone.name)
    .bind(&polygon_json)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load all zones, ordered by name.
pub async fn load_all_zones(pool: &SqlitePool) -> Result<Vec<NoFlyZone>> {
    let rows = sqlx::query_as::<_, ZoneRow>("SELECT name, polygon FROM no_fly_zones ORDER BY name")
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(NoFlyZone::try_from).collect()
}

#[derive(sqlx::FromRow)]
struct ZoneRow {
    name: String,
    polygon: String,
}

impl TryFrom<ZoneRow> for NoFlyZone {
    type Error = anyhow::Error;

    fn try_from(row: ZoneRow) -> Result<Self> {
        let ring: Vec<[f64; 2]> = serde_json::from_str(&row.polygon)?;
        Ok(NoFlyZone::new(
            row.name,
            ring.into_iter().map(GeoPoint::from_lon_lat).collect(),
        ))
    }
}
