//! Read-only queries over the drone store.
//!
//! These are the functions the external list/detail views call. Radius
//! queries validate their coordinates here; out-of-range values are rejected,
//! never clamped.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dronewatch_core::{validate_coordinates, CoordinateError, DangerSummary, DroneState, LineString};
use serde::Deserialize;
use thiserror::Error;

use crate::state::DroneStore;

/// Radius used when the caller does not give one.
pub const DEFAULT_RADIUS_M: f64 = 5_000.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("both longitude and latitude parameters are required")]
    MissingCoordinates,
    #[error("Longitude and latitude must be valid numbers")]
    InvalidNumber,
    #[error(transparent)]
    Coordinates(#[from] CoordinateError),
    #[error("radius must be a non-negative number of meters (got {0})")]
    InvalidRadius(f64),
}

/// Raw query-string parameters for a radius search.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoordinateParams {
    pub longitude: Option<String>,
    pub latitude: Option<String>,
    pub radius_m: Option<String>,
}

pub struct QueryEngine {
    store: Arc<DroneStore>,
    online_window: Duration,
}

impl QueryEngine {
    pub fn new(store: Arc<DroneStore>, online_window: Duration) -> Self {
        Self {
            store,
            online_window,
        }
    }

    /// All drones, optionally narrowed by exact serial and/or a
    /// case-insensitive serial fragment. Empty filters are ignored.
    pub fn list_drones(&self, serial: Option<&str>, partial_serial: Option<&str>) -> Vec<DroneState> {
        let serial = serial.filter(|s| !s.is_empty());
        let fragment = partial_serial
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        match (serial, fragment) {
            (Some(serial), fragment) => self
                .store
                .get_by_serial(serial)
                .into_iter()
                .filter(|drone| {
                    fragment
                        .as_deref()
                        .map_or(true, |f| drone.serial_number.to_lowercase().contains(f))
                })
                .collect(),
            (None, Some(fragment)) => self.store.get_by_partial_serial(&fragment),
            (None, None) => self.store.get_all(),
        }
    }

    pub fn get_drone(&self, serial: &str) -> Option<DroneState> {
        self.store.get_by_serial(serial)
    }

    pub fn list_online(&self) -> Vec<DroneState> {
        self.list_online_at(Utc::now())
    }

    pub fn list_online_at(&self, now: DateTime<Utc>) -> Vec<DroneState> {
        self.store.get_online(now, self.online_window)
    }

    pub fn list_dangerous(&self) -> Vec<DroneState> {
        self.store.get_dangerous()
    }

    pub fn list_dangerous_summaries(&self) -> Vec<DangerSummary> {
        self.list_dangerous()
            .iter()
            .map(DroneState::danger_summary)
            .collect()
    }

    /// Drones within `radius_m` (default 5 km) of a point, boundary included.
    pub fn list_within_radius(
        &self,
        longitude: Option<f64>,
        latitude: Option<f64>,
        radius_m: Option<f64>,
    ) -> Result<Vec<DroneState>, QueryError> {
        let (Some(longitude), Some(latitude)) = (longitude, latitude) else {
            return Err(QueryError::MissingCoordinates);
        };
        let center = validate_coordinates(longitude, latitude)?;

        let radius_m = radius_m.unwrap_or(DEFAULT_RADIUS_M);
        if !radius_m.is_finite() || radius_m < 0.0 {
            return Err(QueryError::InvalidRadius(radius_m));
        }

        Ok(self.store.get_within_radius(center, radius_m))
    }

    /// Radius search from unparsed query-string values.
    pub fn list_within_radius_params(
        &self,
        params: &CoordinateParams,
    ) -> Result<Vec<DroneState>, QueryError> {
        let (Some(longitude), Some(latitude)) = (&params.longitude, &params.latitude) else {
            return Err(QueryError::MissingCoordinates);
        };
        let longitude = parse_number(longitude)?;
        let latitude = parse_number(latitude)?;
        let radius_m = params.radius_m.as_deref().map(parse_number).transpose()?;

        self.list_within_radius(Some(longitude), Some(latitude), radius_m)
    }

    /// The drone's recorded positions in time order, or `None` when there is
    /// no history yet.
    pub fn flight_path(&self, serial: &str) -> Option<LineString> {
        let history = self.store.get_history(serial);
        if history.is_empty() {
            return None;
        }
        Some(LineString {
            coordinates: history.iter().map(|o| o.location.to_lon_lat()).collect(),
        })
    }
}

fn parse_number(raw: &str) -> Result<f64, QueryError> {
    raw.trim().parse().map_err(|_| QueryError::InvalidNumber)
}
