//! Distance and bearing arithmetic on WGS84 coordinates.
//!
//! Everything here is pure. Invalid input is reported through
//! [`LocationError`] by [`validate_location`]; the distance functions
//! assume already-validated degrees.

use crate::constants::{
    DEFAULT_ARRIVAL_THRESHOLD_M, EARTH_RADIUS_M, FEET_PER_METER, KILOMETER_DISPLAY_THRESHOLD_M,
};
use crate::error::LocationError;
use crate::types::Location;

/// Great-circle distance in meters (Haversine).
///
/// Identical points yield exactly `0.0`.
pub fn calculate_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial bearing from `from` to `to` in degrees [0, 360).
pub fn calculate_bearing(from: &Location, to: &Location) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let dlon = (to.longitude - from.longitude).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Inclusive geofence test: a user exactly `threshold_m` away has arrived.
pub fn has_arrived(user: &Location, destination: &Location, threshold_m: f64) -> bool {
    user.distance_to(destination) <= threshold_m
}

/// [`has_arrived`] with the default 50 m geofence.
pub fn has_arrived_default(user: &Location, destination: &Location) -> bool {
    has_arrived(user, destination, DEFAULT_ARRIVAL_THRESHOLD_M)
}

pub fn validate_location(latitude: f64, longitude: f64) -> Result<Location, LocationError> {
    if latitude.is_nan() || longitude.is_nan() {
        return Err(LocationError::NotANumber);
    }
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(LocationError::LatitudeOutOfRange(latitude));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(LocationError::LongitudeOutOfRange(longitude));
    }
    Ok(Location {
        latitude,
        longitude,
    })
}

/// Short distances in feet, longer ones in kilometers with one decimal.
pub fn format_distance(meters: f64) -> String {
    if meters < KILOMETER_DISPLAY_THRESHOLD_M {
        format!("{} ft", (meters * FEET_PER_METER).round() as i64)
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

/// `"25 min"` below an hour, `"1h 5m"` from an hour on.
pub fn format_duration(seconds: u64) -> String {
    let minutes = (seconds as f64 / 60.0).round() as u64;
    if seconds < 3600 {
        format!("{} min", minutes.min(59))
    } else {
        format!("{}h {}m", minutes / 60, minutes % 60)
    }
}
