//! Telemetry ingestion pipeline.
//!
//! Turns one decoded message into exactly one drone upsert plus one history
//! append. With a database configured the pair is committed there first, in a
//! single transaction, and only then applied to the in-memory store; a failed
//! write therefore leaves both sides at their previous state and the message
//! can be retried as is.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dronewatch_core::{DangerClassifier, MalformedMessage, Observation, TelemetryFields};
use serde_json::Value;
use thiserror::Error;

use crate::persistence::{drones as drones_db, Database};
use crate::state::{DroneStore, DroneUpdate};
use crate::stats::IngestStats;
use crate::zones::ZoneCache;

/// One decoded message as handed over by a transport adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEnvelope {
    pub serial_number: String,
    pub payload: Value,
}

impl TelemetryEnvelope {
    pub fn new(serial_number: impl Into<String>, payload: Value) -> Self {
        Self {
            serial_number: serial_number.into(),
            payload,
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// Dropped; retrying the same message cannot succeed.
    #[error("malformed telemetry: {0}")]
    Malformed(#[from] MalformedMessage),
    /// Nothing was applied; the caller should retry.
    #[error("store write failed: {0:#}")]
    Store(anyhow::Error),
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Store(_))
    }
}

pub struct IngestPipeline {
    store: Arc<DroneStore>,
    zones: Arc<ZoneCache>,
    classifier: DangerClassifier,
    db: Option<Database>,
    stats: Arc<IngestStats>,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<DroneStore>,
        zones: Arc<ZoneCache>,
        classifier: DangerClassifier,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self {
            store,
            zones,
            classifier,
            db: None,
            stats,
        }
    }

    /// Write through to `db` before touching the in-memory store.
    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn store(&self) -> &Arc<DroneStore> {
        &self.store
    }

    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    pub async fn ingest(&self, serial: &str, payload: &Value) -> Result<(), IngestError> {
        self.ingest_at(serial, payload, Utc::now()).await
    }

    /// Ingest with an explicit ingestion clock.
    pub async fn ingest_at(
        &self,
        serial: &str,
        payload: &Value,
        now: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        let fields = match decode(serial, payload) {
            Ok(fields) => fields,
            Err(err) => {
                self.stats.record_malformed();
                return Err(err.into());
            }
        };

        let zones = self.zones.snapshot().await;
        let assessment = self.classifier.classify(&fields.sample(), &zones);

        let timestamp = self.store.next_timestamp(serial, now);
        let update = DroneUpdate {
            serial_number: serial.to_string(),
            timestamp,
            location: fields.location,
            height: fields.height_m,
            speed: fields.speed_mps,
            assessment,
        };
        let observation = Observation {
            serial_number: serial.to_string(),
            timestamp,
            location: fields.location,
            height: fields.height_m,
            horizontal_speed: fields.speed_mps,
            raw_payload: payload.clone(),
        };

        if let Some(db) = &self.db {
            if let Err(err) = drones_db::record_observation(db.pool(), &update, &observation).await {
                self.stats.record_store_failure();
                return Err(IngestError::Store(err));
            }
        }

        let state = self.store.record(update, observation);
        self.stats.record_accepted();

        if let Some(reason) = &state.dangerous_reason {
            tracing::debug!("Drone {} flagged dangerous: {}", serial, reason);
        }
        Ok(())
    }
}

fn decode(serial: &str, payload: &Value) -> Result<TelemetryFields, MalformedMessage> {
    if serial.trim().is_empty() {
        return Err(MalformedMessage::EmptySerial);
    }
    TelemetryFields::from_payload(payload)
}
