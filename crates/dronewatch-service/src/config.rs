//! Service configuration from environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dronewatch_core::DangerRules;

const DEFAULT_ONLINE_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite file; `None` keeps everything in memory
    pub database_path: Option<String>,
    pub database_max_connections: u32,
    /// GeoJSON zones file; takes precedence over the database table
    pub zones_path: Option<PathBuf>,
    pub zone_refresh_interval: Duration,
    pub zone_lookup_timeout: Duration,
    pub online_window: chrono::Duration,
    pub danger_rules: DangerRules,
    pub ingest_queue: usize,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).map(|raw| raw.trim().to_string());
        let defaults = DangerRules::default();

        Self {
            database_path: match parse("DRONEWATCH_DATABASE_PATH") {
                Some(path) if path.is_empty() => None,
                Some(path) => Some(path),
                None => Some("data/dronewatch.db".to_string()),
            },
            database_max_connections: parsed(parse("DRONEWATCH_DB_MAX_CONNECTIONS"), 4),
            zones_path: parse("DRONEWATCH_ZONES_PATH")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            zone_refresh_interval: Duration::from_secs(
                parsed(parse("DRONEWATCH_ZONE_REFRESH_SECS"), 30u64).max(1),
            ),
            zone_lookup_timeout: Duration::from_millis(
                parsed(parse("DRONEWATCH_ZONE_LOOKUP_TIMEOUT_MS"), 250u64).max(1),
            ),
            online_window: online_window(parse("DRONEWATCH_ONLINE_WINDOW_SECS")),
            danger_rules: DangerRules {
                max_height_m: parsed(parse("DRONEWATCH_MAX_HEIGHT_M"), defaults.max_height_m),
                max_speed_mps: parsed(parse("DRONEWATCH_MAX_SPEED_MPS"), defaults.max_speed_mps),
            },
            ingest_queue: parsed(parse("DRONEWATCH_INGEST_QUEUE"), 1024usize).max(1),
            log_json: parse("DRONEWATCH_LOG_JSON")
                .map(|raw| matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }
}

/// Non-negative and representable, otherwise the 60 s default.
fn online_window(raw: Option<String>) -> chrono::Duration {
    raw.and_then(|s| s.parse::<i64>().ok())
        .and_then(chrono::Duration::try_seconds)
        .filter(|window| *window >= chrono::Duration::zero())
        .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_ONLINE_WINDOW_SECS))
}

fn parsed<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|s| s.parse().ok()).unwrap_or(default)
}
