//! Exponential retry delays with jitter.
//!
//! Used by the ingest loop when the database rejects a write and by the zone
//! refresh loop when the zone source is down, so an outage turns into a slow
//! trickle of retries instead of a tight loop and a log storm.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

const JITTER_RATIO: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
    retry_at: Option<Instant>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            max: max.max(base),
            failures: 0,
            retry_at: None,
        }
    }

    /// Whether the wait after the last failure has elapsed.
    pub fn ready(&self) -> bool {
        self.retry_at.map_or(true, |at| Instant::now() >= at)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.retry_at = None;
    }

    /// Register a failure and return how long to wait before the next attempt.
    ///
    /// The first failure waits `base`; each further one doubles it, capped at
    /// `max`. Up to 20% jitter is added on top.
    pub fn fail(&mut self) -> Duration {
        let exponent = self.failures.min(16);
        self.failures = self.failures.saturating_add(1);
        let delay = self.base.saturating_mul(1 << exponent).min(self.max);
        let delay = delay + jitter(delay);
        self.retry_at = Some(Instant::now() + delay);
        delay
    }
}

fn jitter(delay: Duration) -> Duration {
    let max_ms = (delay.as_millis() as f64 * JITTER_RATIO) as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    Duration::from_millis(seed % (max_ms + 1))
}
