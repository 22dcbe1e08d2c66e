//! In-memory drone state store using DashMap.
//!
//! Each drone's current state and its observation history live in a single
//! map entry, so the shard lock that guards the entry serializes a write of
//! both against any read of that drone.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dronewatch_core::{distance_meters, DangerAssessment, DroneState, GeoPoint, Observation};
use thiserror::Error;

/// Floating-point slack for the inclusive radius boundary (1 mm).
const RADIUS_TOLERANCE_M: f64 = 1e-3;

/// Everything needed to overwrite a drone's state.
#[derive(Debug, Clone, PartialEq)]
pub struct DroneUpdate {
    pub serial_number: String,
    pub timestamp: DateTime<Utc>,
    pub location: GeoPoint,
    pub height: f64,
    pub speed: f64,
    pub assessment: DangerAssessment,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no state recorded for drone {0}")]
    UnknownDrone(String),
}

#[derive(Debug)]
struct DroneRecord {
    state: DroneState,
    /// Sorted by timestamp; equal timestamps keep insertion order
    history: Vec<Observation>,
}

impl DroneRecord {
    fn from_update(update: &DroneUpdate) -> Self {
        Self {
            state: DroneState {
                serial_number: update.serial_number.clone(),
                created_at: update.timestamp,
                last_seen: update.timestamp,
                last_location: update.location,
                last_height: update.height,
                last_speed: update.speed,
                is_dangerous: update.assessment.is_dangerous,
                dangerous_reason: update.assessment.reason.clone(),
            },
            history: Vec::new(),
        }
    }

    fn apply(&mut self, update: &DroneUpdate) {
        let state = &mut self.state;
        state.last_seen = update.timestamp;
        state.last_location = update.location;
        state.last_height = update.height;
        state.last_speed = update.speed;
        state.is_dangerous = update.assessment.is_dangerous;
        state.dangerous_reason = update.assessment.reason.clone();
    }

    fn push_observation(&mut self, observation: Observation) {
        let index = self
            .history
            .partition_point(|existing| existing.timestamp <= observation.timestamp);
        self.history.insert(index, observation);
    }
}

/// Thread-safe store for current drone state and observation history.
#[derive(Debug, Default)]
pub struct DroneStore {
    drones: DashMap<String, DroneRecord>,
}

impl DroneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the drone's state if absent, otherwise overwrite every mutable field.
    pub fn upsert(&self, update: DroneUpdate) -> DroneState {
        self.drones
            .entry(update.serial_number.clone())
            .and_modify(|record| record.apply(&update))
            .or_insert_with(|| DroneRecord::from_update(&update))
            .state
            .clone()
    }

    /// Append to a drone's history. Duplicate timestamps are accepted.
    pub fn append_observation(&self, observation: Observation) -> Result<(), StoreError> {
        match self.drones.get_mut(&observation.serial_number) {
            Some(mut record) => {
                record.push_observation(observation);
                Ok(())
            }
            None => Err(StoreError::UnknownDrone(observation.serial_number)),
        }
    }

    /// Upsert and append under one entry lock.
    pub fn record(&self, update: DroneUpdate, observation: Observation) -> DroneState {
        debug_assert_eq!(update.serial_number, observation.serial_number);
        let mut record = self
            .drones
            .entry(update.serial_number.clone())
            .and_modify(|record| record.apply(&update))
            .or_insert_with(|| DroneRecord::from_update(&update));
        record.push_observation(observation);
        record.state.clone()
    }

    /// Ingestion time for a new observation: `now`, unless the clock went
    /// backwards relative to the drone's latest observation.
    pub fn next_timestamp(&self, serial: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        self.drones
            .get(serial)
            .and_then(|record| record.history.last().map(|o| o.timestamp))
            .map_or(now, |latest| latest.max(now))
    }

    /// Drones seen at or after `now - window`. A window reaching past the
    /// representable range covers every drone.
    pub fn get_online(&self, now: DateTime<Utc>, window: Duration) -> Vec<DroneState> {
        let cutoff = now
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.collect(|state| state.last_seen >= cutoff)
    }

    pub fn get_by_serial(&self, serial: &str) -> Option<DroneState> {
        self.drones.get(serial).map(|record| record.state.clone())
    }

    /// Case-insensitive substring match on serial numbers.
    pub fn get_by_partial_serial(&self, fragment: &str) -> Vec<DroneState> {
        let needle = fragment.to_lowercase();
        self.collect(|state| state.serial_number.to_lowercase().contains(&needle))
    }

    pub fn get_dangerous(&self) -> Vec<DroneState> {
        self.collect(|state| state.is_dangerous)
    }

    /// Drones whose last location is within `radius_m` of `point`, boundary included.
    pub fn get_within_radius(&self, point: GeoPoint, radius_m: f64) -> Vec<DroneState> {
        self.collect(|state| {
            distance_meters(point, state.last_location) <= radius_m + RADIUS_TOLERANCE_M
        })
    }

    /// Observation history in ascending timestamp order.
    pub fn get_history(&self, serial: &str) -> Vec<Observation> {
        self.drones
            .get(serial)
            .map(|record| record.history.clone())
            .unwrap_or_default()
    }

    pub fn get_all(&self) -> Vec<DroneState> {
        self.collect(|_| true)
    }

    pub fn len(&self) -> usize {
        self.drones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drones.is_empty()
    }

    /// Replace the store contents with persisted data.
    ///
    /// Returns the number of observations dropped because their drone had no
    /// state row.
    pub fn restore(&self, states: Vec<DroneState>, observations: Vec<Observation>) -> usize {
        self.drones.clear();
        for state in states {
            self.drones.insert(
                state.serial_number.clone(),
                DroneRecord {
                    state,
                    history: Vec::new(),
                },
            );
        }

        let mut orphaned = 0;
        for observation in observations {
            if self.append_observation(observation).is_err() {
                orphaned += 1;
            }
        }
        orphaned
    }

    fn collect(&self, predicate: impl Fn(&DroneState) -> bool) -> Vec<DroneState> {
        let mut drones: Vec<DroneState> = self
            .drones
            .iter()
            .filter(|entry| predicate(&entry.value().state))
            .map(|entry| entry.value().state.clone())
            .collect();
        drones.sort_by(|a, b| a.serial_number.cmp(&b.serial_number));
        drones
    }
}
