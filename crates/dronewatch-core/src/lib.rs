pub mod classify;
pub mod models;
pub mod rules;
pub mod spatial;

pub use classify::{AltitudeStrategy, DangerClassifier, DangerStrategy, GeofenceStrategy, SpeedStrategy};
pub use models::{
    DangerAssessment, DangerSummary, DroneState, GeoPoint, LineString, MalformedMessage, NoFlyZone,
    Observation, ObservationSample, TelemetryFields,
};
pub use rules::DangerRules;
pub use spatial::{
    destination, distance_meters, haversine_distance, polygon_contains, validate_coordinates,
    CoordinateError,
};
