//! No-fly zone sources and the cached snapshot used for classification.
//!
//! The cache serves the last loaded zone set while it is younger than the
//! refresh interval. A stale or empty cache triggers a load bounded by the
//! lookup timeout. If that load times out or fails, classification carries on
//! with the last known zones (empty only if nothing ever loaded), the
//! degradation is counted, and the source is not asked again until a short
//! retry delay has passed.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use dronewatch_core::{GeoPoint, NoFlyZone};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::persistence::{zones as zones_db, Database};
use crate::stats::IngestStats;

const LOOKUP_RETRY_AFTER_SECS: u64 = 5;

/// Where reference zones come from.
pub trait ZoneSource: Send + Sync {
    fn describe(&self) -> String;

    fn load(&self) -> BoxFuture<'_, Result<Vec<NoFlyZone>>>;
}

impl<T: ZoneSource + ?Sized> ZoneSource for Arc<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn load(&self) -> BoxFuture<'_, Result<Vec<NoFlyZone>>> {
        (**self).load()
    }
}

/// A fixed zone list.
#[derive(Debug, Clone, Default)]
pub struct StaticZones {
    zones: Vec<NoFlyZone>,
}

impl StaticZones {
    pub fn new(zones: Vec<NoFlyZone>) -> Self {
        Self { zones }
    }
}

impl ZoneSource for StaticZones {
    fn describe(&self) -> String {
        format!("static ({} zones)", self.zones.len())
    }

    fn load(&self) -> BoxFuture<'_, Result<Vec<NoFlyZone>>> {
        let zones = self.zones.clone();
        async move { Ok(zones) }.boxed()
    }
}

/// The `no_fly_zones` table.
#[derive(Clone)]
pub struct DatabaseZones {
    db: Database,
}

impl DatabaseZones {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl ZoneSource for DatabaseZones {
    fn describe(&self) -> String {
        "database table no_fly_zones".to_string()
    }

    fn load(&self) -> BoxFuture<'_, Result<Vec<NoFlyZone>>> {
        zones_db::load_all_zones(self.db.pool()).boxed()
    }
}

/// A GeoJSON FeatureCollection of polygons with a `name` property.
#[derive(Debug, Clone)]
pub struct GeoJsonFileZones {
    path: PathBuf,
}

impl GeoJsonFileZones {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ZoneSource for GeoJsonFileZones {
    fn describe(&self) -> String {
        format!("GeoJSON file {}", self.path.display())
    }

    fn load(&self) -> BoxFuture<'_, Result<Vec<NoFlyZone>>> {
        async move {
            let bytes = tokio::fs::read(&self.path)
                .await
                .with_context(|| format!("reading {}", self.path.display()))?;
            parse_geojson_zones(&bytes)
        }
        .boxed()
    }
}

#[derive(Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Deserialize)]
struct Feature {
    properties: FeatureProperties,
    geometry: PolygonGeometry,
}

#[derive(Deserialize)]
struct FeatureProperties {
    name: String,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum PolygonGeometry {
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
}

/// Parse zones from a GeoJSON FeatureCollection. Only the exterior ring of
/// each polygon is used; altitude components are ignored.
pub fn parse_geojson_zones(bytes: &[u8]) -> Result<Vec<NoFlyZone>> {
    let collection: FeatureCollection = serde_json::from_slice(bytes)?;

    collection
        .features
        .into_iter()
        .map(|feature| {
            let PolygonGeometry::Polygon { coordinates } = feature.geometry;
            let exterior = coordinates
                .into_iter()
                .next()
                .with_context(|| format!("zone {} has no rings", feature.properties.name))?;
            let ring = exterior
                .into_iter()
                .map(|position| match position.as_slice() {
                    [lon, lat, ..] => Ok(GeoPoint::new(*lon, *lat)),
                    _ => anyhow::bail!(
                        "zone {} has a position with fewer than two values",
                        feature.properties.name
                    ),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(NoFlyZone::new(feature.properties.name, ring))
        })
        .collect()
}

#[derive(Debug, Error)]
pub enum ZoneLookupError {
    #[error("zone lookup timed out after {0:?}")]
    Timeout(Duration),
    #[error("zone source failed: {0:#}")]
    Source(anyhow::Error),
}

#[derive(Clone)]
struct CachedZones {
    zones: Arc<[NoFlyZone]>,
    fetched_at: Instant,
}

#[derive(Default)]
struct CacheState {
    cached: Option<CachedZones>,
    /// Set after a failed load; no reload is attempted before it.
    retry_at: Option<Instant>,
}

impl CacheState {
    fn last_known(&self) -> Arc<[NoFlyZone]> {
        self.cached
            .as_ref()
            .map(|entry| entry.zones.clone())
            .unwrap_or_else(no_zones)
    }
}

enum Lookup {
    Fresh(Arc<[NoFlyZone]>),
    Degraded(Arc<[NoFlyZone]>),
    Reload,
}

fn no_zones() -> Arc<[NoFlyZone]> {
    Arc::from(Vec::new())
}

/// Cached, timeout-bounded access to the current zone set.
pub struct ZoneCache {
    source: Box<dyn ZoneSource>,
    state: RwLock<CacheState>,
    refresh_interval: Duration,
    lookup_timeout: Duration,
    stats: Arc<IngestStats>,
}

impl ZoneCache {
    pub fn new(
        source: Box<dyn ZoneSource>,
        refresh_interval: Duration,
        lookup_timeout: Duration,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self {
            source,
            state: RwLock::new(CacheState::default()),
            refresh_interval,
            lookup_timeout,
            stats,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    /// Zones for one classification. Never fails: a lookup that times out or
    /// errors yields the last known set, or an empty one if none was loaded.
    pub async fn snapshot(&self) -> Arc<[NoFlyZone]> {
        match self.lookup() {
            Lookup::Fresh(zones) => zones,
            Lookup::Degraded(zones) => {
                self.stats.record_zone_degraded();
                debug!("Zone source still failing; using {} last known zones", zones.len());
                zones
            }
            Lookup::Reload => match self.refresh().await {
                Ok(zones) => zones,
                Err(err) => {
                    self.stats.record_zone_degraded();
                    let zones = self.last_known();
                    warn!(
                        "Classifying with {} last known no-fly zones: {}",
                        zones.len(),
                        err
                    );
                    zones
                }
            },
        }
    }

    /// Load from the source, bounded by the lookup timeout, and cache the result.
    /// A failure leaves the cached set in place and delays the next reload.
    pub async fn refresh(&self) -> Result<Arc<[NoFlyZone]>, ZoneLookupError> {
        let loaded = match tokio::time::timeout(self.lookup_timeout, self.source.load()).await {
            Ok(Ok(zones)) => Ok(zones),
            Ok(Err(err)) => Err(ZoneLookupError::Source(err)),
            Err(_) => Err(ZoneLookupError::Timeout(self.lookup_timeout)),
        };

        match loaded {
            Ok(zones) => {
                let zones: Arc<[NoFlyZone]> = Arc::from(zones);
                if let Ok(mut state) = self.state.write() {
                    state.cached = Some(CachedZones {
                        zones: zones.clone(),
                        fetched_at: Instant::now(),
                    });
                    state.retry_at = None;
                }
                debug!("Loaded {} no-fly zones from {}", zones.len(), self.source.describe());
                Ok(zones)
            }
            Err(err) => {
                if let Ok(mut state) = self.state.write() {
                    state.retry_at = Some(Instant::now() + self.retry_delay());
                }
                Err(err)
            }
        }
    }

    fn retry_delay(&self) -> Duration {
        self.refresh_interval
            .min(Duration::from_secs(LOOKUP_RETRY_AFTER_SECS))
    }

    fn lookup(&self) -> Lookup {
        let Ok(state) = self.state.read() else {
            return Lookup::Reload;
        };
        let now = Instant::now();
        if let Some(entry) = state
            .cached
            .as_ref()
            .filter(|entry| now.duration_since(entry.fetched_at) < self.refresh_interval)
        {
            return Lookup::Fresh(entry.zones.clone());
        }
        match state.retry_at {
            Some(retry_at) if now < retry_at => Lookup::Degraded(state.last_known()),
            _ => Lookup::Reload,
        }
    }

    fn last_known(&self) -> Arc<[NoFlyZone]> {
        self.state
            .read()
            .map(|state| state.last_known())
            .unwrap_or_else(|_| no_zones())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn square(name: &str) -> NoFlyZone {
        NoFlyZone::new(
            name,
            vec![
                GeoPoint::new(35.0, 31.0),
                GeoPoint::new(36.0, 31.0),
                GeoPoint::new(36.0, 32.0),
                GeoPoint::new(35.0, 32.0),
            ],
        )
    }

    struct CountingZones {
        loads: AtomicUsize,
    }

    impl ZoneSource for CountingZones {
        fn describe(&self) -> String {
            "counting".to_string()
        }

        fn load(&self) -> BoxFuture<'_, Result<Vec<NoFlyZone>>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            async move { Ok(vec![square("Alpha")]) }.boxed()
        }
    }

    struct FlakyZones {
        loads: AtomicUsize,
        failing: AtomicBool,
    }

    impl ZoneSource for FlakyZones {
        fn describe(&self) -> String {
            "flaky".to_string()
        }

        fn load(&self) -> BoxFuture<'_, Result<Vec<NoFlyZone>>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let failing = self.failing.load(Ordering::SeqCst);
            async move {
                if failing {
                    anyhow::bail!("zone table unavailable");
                }
                Ok(vec![square("Alpha")])
            }
            .boxed()
        }
    }

    struct SlowZones;

    impl ZoneSource for SlowZones {
        fn describe(&self) -> String {
            "slow".to_string()
        }

        fn load(&self) -> BoxFuture<'_, Result<Vec<NoFlyZone>>> {
            async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(vec![square("Alpha")])
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn fresh_cache_is_served_without_reloading() {
        let source = Arc::new(CountingZones {
            loads: AtomicUsize::new(0),
        });
        let cache = ZoneCache::new(
            Box::new(source.clone()),
            Duration::from_secs(30),
            Duration::from_secs(1),
            Arc::new(IngestStats::default()),
        );

        assert_eq!(cache.snapshot().await.len(), 1);
        assert_eq!(cache.snapshot().await.len(), 1);
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_cache_reloads() {
        let source = Arc::new(CountingZones {
            loads: AtomicUsize::new(0),
        });
        let cache = ZoneCache::new(
            Box::new(source.clone()),
            Duration::from_secs(30),
            Duration::from_secs(1),
            Arc::new(IngestStats::default()),
        );

        cache.snapshot().await;
        tokio::time::advance(Duration::from_secs(31)).await;
        cache.snapshot().await;
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_degrades_to_no_zones_and_counts() {
        let stats = Arc::new(IngestStats::default());
        let cache = ZoneCache::new(
            Box::new(SlowZones),
            Duration::from_secs(30),
            Duration::from_millis(250),
            stats.clone(),
        );

        let zones = cache.snapshot().await;
        assert!(zones.is_empty());
        assert_eq!(stats.snapshot().zone_lookups_degraded, 1);

        let err = cache.refresh().await.unwrap_err();
        assert!(matches!(err, ZoneLookupError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reload_keeps_serving_last_known_zones() {
        let stats = Arc::new(IngestStats::default());
        let source = Arc::new(FlakyZones {
            loads: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        });
        let cache = ZoneCache::new(
            Box::new(source.clone()),
            Duration::from_secs(30),
            Duration::from_millis(250),
            stats.clone(),
        );

        assert_eq!(cache.snapshot().await.len(), 1);

        source.failing.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(31)).await;
        let zones = cache.snapshot().await;
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].name, "Alpha");
        assert_eq!(stats.snapshot().zone_lookups_degraded, 1);
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);

        // within the retry delay the source is left alone
        assert_eq!(cache.snapshot().await.len(), 1);
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
        assert_eq!(stats.snapshot().zone_lookups_degraded, 2);

        source.failing.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(LOOKUP_RETRY_AFTER_SECS + 1)).await;
        assert_eq!(cache.snapshot().await.len(), 1);
        assert_eq!(source.loads.load(Ordering::SeqCst), 3);
        assert_eq!(stats.snapshot().zone_lookups_degraded, 2);
    }

    #[test]
    fn parses_feature_collection() {
        let doc = br#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"name": "Airport"},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[35.0, 31.0, 0.0], [36.0, 31.0, 0.0], [36.0, 32.0, 0.0], [35.0, 31.0, 0.0]]]
                }
            }]
        }"#;

        let zones = parse_geojson_zones(doc).unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].name, "Airport");
        assert_eq!(zones[0].polygon[1], GeoPoint::new(36.0, 31.0));
    }

    #[test]
    fn rejects_non_polygon_geometry() {
        let doc = br#"{
            "features": [{
                "properties": {"name": "Spot"},
                "geometry": {"type": "Point", "coordinates": [35.0, 31.0]}
            }]
        }"#;
        assert!(parse_geojson_zones(doc).is_err());
    }
}
