//! Dronewatch - always-on drone telemetry ingestion and danger tracking.
//!
//! Reads `<topic> <json>` telemetry lines from stdin until EOF or Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::BufReader;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dronewatch_core::DangerClassifier;
use dronewatch_service::adapter::run_line_adapter;
use dronewatch_service::config::Config;
use dronewatch_service::loops::{ingest_loop::run_ingest_loop, zone_refresh_loop::run_zone_refresh_loop};
use dronewatch_service::persistence::{drones as drones_db, init_database};
use dronewatch_service::stats::IngestStats;
use dronewatch_service::zones::{DatabaseZones, GeoJsonFileZones, StaticZones, ZoneCache, ZoneSource};
use dronewatch_service::{DroneStore, IngestPipeline, QueryEngine};

const RUNTIME_SHUTDOWN_TIMEOUT_SECS: u64 = 2;

fn main() -> Result<()> {
    let config = Config::from_env();
    init_tracing(config.log_json)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(config));
    // stdin reads park a blocking thread that never returns on its own
    runtime.shutdown_timeout(Duration::from_secs(RUNTIME_SHUTDOWN_TIMEOUT_SECS));
    result
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("dronewatch=debug".parse()?)
        .add_directive("dronewatch_service=debug".parse()?);
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    tracing::info!("Starting Dronewatch...");

    let db = match &config.database_path {
        Some(path) => Some(init_database(path, config.database_max_connections).await?),
        None => {
            tracing::warn!("DRONEWATCH_DATABASE_PATH is empty; state will not survive a restart");
            None
        }
    };

    let store = Arc::new(DroneStore::new());
    if let Some(db) = &db {
        drones_db::hydrate_store(db.pool(), &store).await?;
    }

    let stats = Arc::new(IngestStats::default());
    let source: Box<dyn ZoneSource> = match (&config.zones_path, &db) {
        (Some(path), _) => Box::new(GeoJsonFileZones::new(path.clone())),
        (None, Some(db)) => Box::new(DatabaseZones::new(db.clone())),
        (None, None) => Box::new(StaticZones::default()),
    };
    let zones = Arc::new(ZoneCache::new(
        source,
        config.zone_refresh_interval,
        config.zone_lookup_timeout,
        stats.clone(),
    ));
    tracing::info!("No-fly zones from {}", zones.describe());

    let classifier = DangerClassifier::new(config.danger_rules);
    tracing::info!("Danger strategies: {}", classifier.strategy_names().join(", "));

    let mut pipeline = IngestPipeline::new(store.clone(), zones.clone(), classifier, stats);
    if let Some(db) = &db {
        pipeline = pipeline.with_database(db.clone());
    }
    let pipeline = Arc::new(pipeline);

    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let (tx, rx) = mpsc::channel(config.ingest_queue);

    let mut ingest = tokio::spawn(run_ingest_loop(pipeline, rx, shutdown_tx.subscribe()));
    let zone_loop = tokio::spawn(run_zone_refresh_loop(zones, shutdown_tx.subscribe()));
    let mut adapter = tokio::spawn(run_line_adapter(
        BufReader::new(tokio::io::stdin()),
        tx,
        shutdown_tx.subscribe(),
    ));

    let input_finished = tokio::select! {
        _ = shutdown_signal() => false,
        joined = &mut adapter => {
            match joined {
                Ok(Ok(forwarded)) => tracing::info!("Telemetry input forwarded {} messages", forwarded),
                Ok(Err(err)) => tracing::warn!("Telemetry input failed: {}", err),
                Err(err) => tracing::warn!("Telemetry input task failed: {}", err),
            }
            true
        }
    };

    let mut ingest_finished = false;
    if input_finished {
        tracing::info!("Draining ingest queue");
        tokio::select! {
            joined = &mut ingest => {
                report_join("ingest", joined);
                ingest_finished = true;
            }
            _ = shutdown_signal() => {}
        }
    }

    let _ = shutdown_tx.send(());
    if !ingest_finished {
        report_join("ingest", ingest.await);
    }
    report_join("zone refresh", zone_loop.await);
    if !input_finished {
        adapter.abort();
    }

    let query = QueryEngine::new(store, config.online_window);
    tracing::info!(
        "Tracking {} drones, {} dangerous",
        query.list_drones(None, None).len(),
        query.list_dangerous().len()
    );

    if let Some(db) = db {
        db.close().await;
    }
    tracing::info!("Dronewatch stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn report_join(name: &str, joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        tracing::warn!("{} loop ended abnormally: {}", name, err);
    }
}
