//! Telemetry ingest loop.
//!
//! The single consumer of the ingest channel. Messages are processed one at a
//! time in arrival order. Malformed messages are logged and dropped; a failed
//! database write is retried with backoff until it lands or shutdown arrives.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use crate::backoff::Backoff;
use crate::ingest::{IngestPipeline, TelemetryEnvelope};

const INGEST_RETRY_BASE_MS: u64 = 100;
const INGEST_RETRY_MAX_SECS: u64 = 10;

pub async fn run_ingest_loop(
    pipeline: Arc<IngestPipeline>,
    mut rx: mpsc::Receiver<TelemetryEnvelope>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut backoff = Backoff::new(
        Duration::from_millis(INGEST_RETRY_BASE_MS),
        Duration::from_secs(INGEST_RETRY_MAX_SECS),
    );

    loop {
        let envelope = tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Ingest loop shutting down");
                break;
            }
            maybe_envelope = rx.recv() => match maybe_envelope {
                Some(envelope) => envelope,
                None => {
                    tracing::info!("Ingest channel closed");
                    break;
                }
            }
        };

        if !deliver(&pipeline, &envelope, &mut backoff, &mut shutdown).await {
            tracing::info!("Ingest loop shutting down");
            break;
        }
    }

    drain_queue(&pipeline, &mut rx).await;

    let stats = pipeline.stats().snapshot();
    match serde_json::to_string(&stats) {
        Ok(json) => tracing::info!("Ingest totals: {}", json),
        Err(_) => tracing::info!("Ingest totals: {:?}", stats),
    }
}

/// Ingest one message, retrying store failures. Returns `false` when shutdown
/// interrupted the retries.
async fn deliver(
    pipeline: &IngestPipeline,
    envelope: &TelemetryEnvelope,
    backoff: &mut Backoff,
    shutdown: &mut broadcast::Receiver<()>,
) -> bool {
    loop {
        match pipeline.ingest(&envelope.serial_number, &envelope.payload).await {
            Ok(()) => {
                backoff.reset();
                return true;
            }
            Err(err) if err.is_retryable() => {
                let delay = backoff.fail();
                tracing::warn!(
                    "Ingest of {} failed: {} (retry {} in {:?})",
                    envelope.serial_number,
                    err,
                    backoff.failures(),
                    delay
                );
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::warn!(
                            "Abandoning undelivered telemetry from {}",
                            envelope.serial_number
                        );
                        return false;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => {
                tracing::warn!(
                    "Dropping telemetry from {:?}: {}",
                    envelope.serial_number,
                    err
                );
                return true;
            }
        }
    }
}

/// Best-effort pass over whatever was queued before shutdown. No retries.
async fn drain_queue(pipeline: &IngestPipeline, rx: &mut mpsc::Receiver<TelemetryEnvelope>) {
    rx.close();
    while let Ok(envelope) = rx.try_recv() {
        if let Err(err) = pipeline.ingest(&envelope.serial_number, &envelope.payload).await {
            tracing::warn!(
                "Final ingest of {:?} failed: {}",
                envelope.serial_number,
                err
            );
        }
    }
}
