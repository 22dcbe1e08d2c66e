//! Line-oriented transport adapter.
//!
//! Reads `<topic> <json>` lines, e.g. a broker capture replayed from a file,
//! and forwards them to the ingest channel. Topics follow
//! `thing/product/<serial>/osd`. Lines that cannot be decoded are logged and
//! skipped.

use anyhow::Result;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{broadcast, mpsc};

use crate::ingest::TelemetryEnvelope;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("line has no payload after the topic")]
    MissingPayload,
    #[error("topic {0:?} carries no serial number")]
    NoSerial(String),
    #[error("line is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("failed to decode JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serial number segment of a `thing/product/<serial>/osd` topic.
pub fn serial_from_topic(topic: &str) -> Option<&str> {
    topic
        .split('/')
        .nth(2)
        .map(str::trim)
        .filter(|serial| !serial.is_empty())
}

pub fn parse_line(line: &str) -> Result<TelemetryEnvelope, AdapterError> {
    let line = line.trim();
    let (topic, payload) = line
        .split_once(char::is_whitespace)
        .ok_or(AdapterError::MissingPayload)?;
    let serial = serial_from_topic(topic).ok_or_else(|| AdapterError::NoSerial(topic.to_string()))?;
    let payload: Value = serde_json::from_str(payload.trim())?;
    Ok(TelemetryEnvelope::new(serial, payload))
}

/// Decode one raw line read off the transport.
pub fn parse_raw_line(raw: &[u8]) -> Result<TelemetryEnvelope, AdapterError> {
    parse_line(std::str::from_utf8(raw)?)
}

/// Forward every decodable line until EOF, shutdown, or the channel closes.
/// Returns the number of messages forwarded.
pub async fn run_line_adapter<R>(
    reader: R,
    tx: mpsc::Sender<TelemetryEnvelope>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut reader = reader;
    let mut buf = Vec::new();
    let mut forwarded = 0usize;

    loop {
        buf.clear();
        // a cancelled read leaves partial bytes in buf; shutdown discards them
        let read = tokio::select! {
            _ = shutdown.recv() => break,
            read = reader.read_until(b'\n', &mut buf) => read?,
        };
        if read == 0 {
            tracing::info!("Telemetry input reached end of stream");
            break;
        }
        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match parse_raw_line(&buf) {
            Ok(envelope) => {
                if tx.send(envelope).await.is_err() {
                    tracing::warn!("Ingest channel closed; stopping telemetry input");
                    break;
                }
                forwarded += 1;
            }
            Err(err) => tracing::warn!("Skipping telemetry line: {}", err),
        }
    }

    Ok(forwarded)
}
