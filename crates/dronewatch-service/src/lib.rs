//! Dronewatch service: telemetry ingestion, drone state and geospatial queries.

pub mod adapter;
pub mod backoff;
pub mod config;
pub mod ingest;
pub mod loops;
pub mod persistence;
pub mod query;
pub mod state;
pub mod stats;
pub mod zones;

pub use ingest::{IngestError, IngestPipeline, TelemetryEnvelope};
pub use query::{CoordinateParams, QueryEngine, QueryError};
pub use state::DroneStore;
