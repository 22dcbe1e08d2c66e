//! Keeps the no-fly zone cache warm.
//!
//! Reloads the zone set once per refresh interval so classifications rarely
//! pay for a lookup themselves.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;

use crate::backoff::Backoff;
use crate::zones::ZoneCache;

const ZONE_REFRESH_BACKOFF_MAX_SECS: u64 = 300;

pub async fn run_zone_refresh_loop(zones: Arc<ZoneCache>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(zones.refresh_interval());
    let mut backoff = Backoff::new(
        zones.refresh_interval(),
        Duration::from_secs(ZONE_REFRESH_BACKOFF_MAX_SECS),
    );
    let mut last_count: Option<usize> = None;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Zone refresh loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                if !backoff.ready() {
                    continue;
                }
                match zones.refresh().await {
                    Ok(loaded) => {
                        backoff.reset();
                        if last_count != Some(loaded.len()) {
                            tracing::info!(
                                "No-fly zones: {} loaded from {}",
                                loaded.len(),
                                zones.describe()
                            );
                            last_count = Some(loaded.len());
                        }
                    }
                    Err(err) => {
                        let delay = backoff.fail();
                        tracing::warn!(
                            "Zone refresh from {} failed: {} (backing off {:?})",
                            zones.describe(),
                            err,
                            delay
                        );
                    }
                }
            }
        }
    }
}
