//! Core data models for drone telemetry tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::spatial::{validate_coordinates, CoordinateError};

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// GeoJSON coordinate order: `[lon, lat]`.
    pub fn to_lon_lat(self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }

    pub fn from_lon_lat(pair: [f64; 2]) -> Self {
        Self::new(pair[0], pair[1])
    }
}

/// Current best-known state of one drone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneState {
    pub serial_number: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_location: GeoPoint,
    /// Meters above takeoff point
    pub last_height: f64,
    /// Horizontal speed in m/s
    pub last_speed: f64,
    pub is_dangerous: bool,
    pub dangerous_reason: Option<String>,
}

impl DroneState {
    pub fn danger_summary(&self) -> DangerSummary {
        DangerSummary {
            serial_number: self.serial_number.clone(),
            is_dangerous: self.is_dangerous,
            dangerous_reason: self.dangerous_reason.clone(),
        }
    }
}

/// Reduced view of a drone used by danger listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DangerSummary {
    pub serial_number: String,
    pub is_dangerous: bool,
    pub dangerous_reason: Option<String>,
}

/// One accepted telemetry message. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub serial_number: String,
    pub timestamp: DateTime<Utc>,
    pub location: GeoPoint,
    pub height: f64,
    pub horizontal_speed: f64,
    /// The decoded message exactly as received, extra fields included
    pub raw_payload: Value,
}

/// A restricted polygon provisioned as reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoFlyZone {
    pub name: String,
    /// Exterior ring; may be open or closed
    pub polygon: Vec<GeoPoint>,
}

impl NoFlyZone {
    pub fn new(name: impl Into<String>, polygon: Vec<GeoPoint>) -> Self {
        Self {
            name: name.into(),
            polygon,
        }
    }

    /// Boundary-inclusive containment check.
    pub fn contains(&self, point: GeoPoint) -> bool {
        crate::spatial::polygon_contains(&self.polygon, point)
    }
}

/// Combined verdict of every danger strategy for one observation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DangerAssessment {
    pub is_dangerous: bool,
    pub reason: Option<String>,
}

impl DangerAssessment {
    pub fn safe() -> Self {
        Self::default()
    }
}

/// What a danger strategy gets to look at.
///
/// Height and speed are optional so partially populated samples can still be
/// classified by the strategies that do not need them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationSample {
    pub location: GeoPoint,
    pub height_m: Option<f64>,
    pub speed_mps: Option<f64>,
}

/// GeoJSON line geometry for a drone's flight path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub struct LineString {
    pub coordinates: Vec<[f64; 2]>,
}

/// Reasons a telemetry payload is rejected before it touches any state.
#[derive(Debug, Error)]
pub enum MalformedMessage {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` is not numeric")]
    NonNumeric(&'static str),
    #[error("serial number is empty")]
    EmptySerial,
    #[error(transparent)]
    Coordinates(#[from] CoordinateError),
}

/// Required fields extracted from a decoded telemetry payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryFields {
    pub location: GeoPoint,
    pub height_m: f64,
    pub speed_mps: f64,
}

impl TelemetryFields {
    pub const LONGITUDE: &'static str = "longitude";
    pub const LATITUDE: &'static str = "latitude";
    pub const HEIGHT: &'static str = "height";
    pub const HORIZONTAL_SPEED: &'static str = "horizontal_speed";

    /// Pull the four required numeric fields out of a payload.
    ///
    /// Numbers encoded as strings are rejected, as are positions outside the
    /// WGS84 range. Any other field is ignored here.
    pub fn from_payload(payload: &Value) -> Result<Self, MalformedMessage> {
        let object = payload.as_object().ok_or(MalformedMessage::NotAnObject)?;

        let longitude = required_number(object, Self::LONGITUDE)?;
        let latitude = required_number(object, Self::LATITUDE)?;
        let height_m = required_number(object, Self::HEIGHT)?;
        let speed_mps = required_number(object, Self::HORIZONTAL_SPEED)?;
        let location = validate_coordinates(longitude, latitude)?;

        Ok(Self {
            location,
            height_m,
            speed_mps,
        })
    }

    pub fn sample(&self) -> ObservationSample {
        ObservationSample {
            location: self.location,
            height_m: Some(self.height_m),
            speed_mps: Some(self.speed_mps),
        }
    }
}

fn required_number(object: &Map<String, Value>, field: &'static str) -> Result<f64, MalformedMessage> {
    match object.get(field) {
        None | Some(Value::Null) => Err(MalformedMessage::MissingField(field)),
        Some(value) => value.as_f64().ok_or(MalformedMessage::NonNumeric(field)),
    }
}
