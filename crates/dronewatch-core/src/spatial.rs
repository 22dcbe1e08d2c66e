//! Geometry primitives: geodesic distance and point-in-polygon tests.
//!
//! Distances are computed on the WGS84 ellipsoid with Vincenty's formulae so
//! that kilometre-scale radius checks stay within millimetres of a proper
//! geography backend. Polygon tests work on raw lon/lat coordinates, which is
//! adequate for small, simple rings that do not straddle the antimeridian.

use thiserror::Error;

use crate::models::GeoPoint;

/// WGS84 semi-major axis in meters.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// Mean earth radius used by the spherical fallback.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

const VINCENTY_MAX_ITERATIONS: usize = 200;
const VINCENTY_CONVERGENCE: f64 = 1e-12;

/// Tolerance, in degrees, for treating a point as lying on a polygon edge.
/// Roughly a centimetre on the ground.
const BOUNDARY_EPS_DEG: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CoordinateError {
    #[error("longitude must be between -180 and 180 (got {0})")]
    LongitudeOutOfRange(f64),
    #[error("latitude must be between -90 and 90 (got {0})")]
    LatitudeOutOfRange(f64),
    #[error("coordinates must be finite numbers")]
    NotFinite,
}

/// Check that a lon/lat pair is a valid WGS84 position. Never clamps.
pub fn validate_coordinates(longitude: f64, latitude: f64) -> Result<GeoPoint, CoordinateError> {
    if !longitude.is_finite() || !latitude.is_finite() {
        return Err(CoordinateError::NotFinite);
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(CoordinateError::LongitudeOutOfRange(longitude));
    }
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(CoordinateError::LatitudeOutOfRange(latitude));
    }
    Ok(GeoPoint::new(longitude, latitude))
}

/// Geodesic distance between two points in meters.
///
/// Uses the Vincenty inverse solution on the WGS84 ellipsoid. For nearly
/// antipodal points, where the iteration does not converge, falls back to the
/// haversine great-circle distance.
pub fn distance_meters(p1: GeoPoint, p2: GeoPoint) -> f64 {
    vincenty_inverse(p1, p2).unwrap_or_else(|| {
        haversine_distance(p1.latitude, p1.longitude, p2.latitude, p2.longitude)
    })
}

/// Calculate distance between two points in meters using Haversine formula.
///
/// # Arguments
/// * `lat1`, `lon1` - First point coordinates in decimal degrees
/// * `lat2`, `lon2` - Second point coordinates in decimal degrees
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

fn semi_minor_axis() -> f64 {
    (1.0 - WGS84_F) * WGS84_A
}

/// Series coefficients A and B shared by the inverse and direct solutions.
fn series_coefficients(cos_sq_alpha: f64) -> (f64, f64) {
    let b = semi_minor_axis();
    let u_sq = cos_sq_alpha * (WGS84_A * WGS84_A - b * b) / (b * b);
    let big_a =
        1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
    (big_a, big_b)
}

fn delta_sigma(big_b: f64, sin_sigma: f64, cos_sigma: f64, cos_2sigma_m: f64) -> f64 {
    let cos_2sm_sq = cos_2sigma_m * cos_2sigma_m;
    big_b
        * sin_sigma
        * (cos_2sigma_m
            + big_b / 4.0
                * (cos_sigma * (-1.0 + 2.0 * cos_2sm_sq)
                    - big_b / 6.0
                        * cos_2sigma_m
                        * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                        * (-3.0 + 4.0 * cos_2sm_sq)))
}

fn vincenty_inverse(p1: GeoPoint, p2: GeoPoint) -> Option<f64> {
    let f = WGS84_F;
    let b = semi_minor_axis();

    let l = (p2.longitude - p1.longitude).to_radians();
    let u1 = ((1.0 - f) * p1.latitude.to_radians().tan()).atan();
    let u2 = ((1.0 - f) * p2.latitude.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..VINCENTY_MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            // coincident points
            return Some(0.0);
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // equatorial line: cos_sq_alpha == 0
        let cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            0.0
        };
        let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
        let previous = lambda;
        lambda = l
            + (1.0 - c)
                * f
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));

        if (lambda - previous).abs() < VINCENTY_CONVERGENCE {
            let (big_a, big_b) = series_coefficients(cos_sq_alpha);
            let ds = delta_sigma(big_b, sin_sigma, cos_sigma, cos_2sigma_m);
            return Some(b * big_a * (sigma - ds));
        }
    }

    None
}

/// Point reached by travelling `distance_m` from `origin` along the initial
/// bearing `bearing_deg` (0 = north, 90 = east) on the WGS84 ellipsoid.
pub fn destination(origin: GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    if distance_m.abs() <= f64::EPSILON {
        return origin;
    }

    let f = WGS84_F;
    let b = semi_minor_axis();
    let (sin_alpha1, cos_alpha1) = bearing_deg.to_radians().sin_cos();

    let tan_u1 = (1.0 - f) * origin.latitude.to_radians().tan();
    let cos_u1 = 1.0 / (1.0 + tan_u1 * tan_u1).sqrt();
    let sin_u1 = tan_u1 * cos_u1;

    let sigma1 = tan_u1.atan2(cos_alpha1);
    let sin_alpha = cos_u1 * sin_alpha1;
    let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
    let (big_a, big_b) = series_coefficients(cos_sq_alpha);

    let base_sigma = distance_m / (b * big_a);
    let mut sigma = base_sigma;
    for _ in 0..VINCENTY_MAX_ITERATIONS {
        let cos_2sigma_m = (2.0 * sigma1 + sigma).cos();
        let (sin_sigma, cos_sigma) = sigma.sin_cos();
        let previous = sigma;
        sigma = base_sigma + delta_sigma(big_b, sin_sigma, cos_sigma, cos_2sigma_m);
        if (sigma - previous).abs() < VINCENTY_CONVERGENCE {
            break;
        }
    }

    let cos_2sigma_m = (2.0 * sigma1 + sigma).cos();
    let (sin_sigma, cos_sigma) = sigma.sin_cos();

    let x = sin_u1 * sin_sigma - cos_u1 * cos_sigma * cos_alpha1;
    let lat2 = (sin_u1 * cos_sigma + cos_u1 * sin_sigma * cos_alpha1)
        .atan2((1.0 - f) * (sin_alpha * sin_alpha + x * x).sqrt());
    let lambda =
        (sin_sigma * sin_alpha1).atan2(cos_u1 * cos_sigma - sin_u1 * sin_sigma * cos_alpha1);
    let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
    let l = lambda
        - (1.0 - c)
            * f
            * sin_alpha
            * (sigma
                + c * sin_sigma
                    * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));

    let lon2 = (origin.longitude.to_radians() + l + std::f64::consts::PI)
        .rem_euclid(2.0 * std::f64::consts::PI)
        - std::f64::consts::PI;

    GeoPoint::new(lon2.to_degrees(), lat2.to_degrees())
}

/// Point-in-polygon test with an inclusive boundary.
///
/// Points on an edge or vertex are inside. Uses ray casting on lon/lat for
/// interior points. Rings with fewer than three vertices contain nothing.
pub fn polygon_contains(ring: &[GeoPoint], point: GeoPoint) -> bool {
    let vertices = open_ring(ring);
    let n = vertices.len();
    if n < 3 {
        return false;
    }

    let (x, y) = (point.longitude, point.latitude);
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (vertices[i].longitude, vertices[i].latitude);
        let (xj, yj) = (vertices[j].longitude, vertices[j].latitude);

        if on_segment((xj, yj), (xi, yi), (x, y)) {
            return true;
        }

        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }

    inside
}

/// Drop the closing vertex of a closed ring.
fn open_ring(ring: &[GeoPoint]) -> &[GeoPoint] {
    match (ring.first(), ring.last()) {
        (Some(first), Some(last)) if ring.len() > 1 && first == last => &ring[..ring.len() - 1],
        _ => ring,
    }
}

fn on_segment(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> bool {
    let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
    let length = ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt();
    if length <= f64::EPSILON {
        return (p.0 - a.0).abs() <= BOUNDARY_EPS_DEG && (p.1 - a.1).abs() <= BOUNDARY_EPS_DEG;
    }
    // perpendicular distance from p to the line through a and b
    if (cross / length).abs() > BOUNDARY_EPS_DEG {
        return false;
    }
    let within = |lo: f64, hi: f64, v: f64| {
        v >= lo.min(hi) - BOUNDARY_EPS_DEG && v <= lo.max(hi) + BOUNDARY_EPS_DEG
    };
    within(a.0, b.0, p.0) && within(a.1, b.1, p.1)
}
