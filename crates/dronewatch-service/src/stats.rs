//! Ingestion counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters shared by the pipeline, the zone cache and the loops.
#[derive(Debug, Default)]
pub struct IngestStats {
    accepted: AtomicU64,
    rejected_malformed: AtomicU64,
    store_write_failures: AtomicU64,
    zone_lookups_degraded: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    pub accepted: u64,
    pub rejected_malformed: u64,
    pub store_write_failures: u64,
    pub zone_lookups_degraded: u64,
}

impl IngestStats {
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.rejected_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_zone_degraded(&self) {
        self.zone_lookups_degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected_malformed: self.rejected_malformed.load(Ordering::Relaxed),
            store_write_failures: self.store_write_failures.load(Ordering::Relaxed),
            zone_lookups_degraded: self.zone_lookups_degraded.load(Ordering::Relaxed),
        }
    }
}
