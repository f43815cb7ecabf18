//! Great-circle distance between coordinates (Haversine)

use crate::domain::types::Coordinates;

/// Mean Earth radius used by the Haversine formula
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Distance in kilometers between two coordinates
pub fn distance_km<A, B>(a: &A, b: &B) -> f64
where
    A: Coordinates + ?Sized,
    B: Coordinates + ?Sized,
{
    let d_lat = (b.latitude() - a.latitude()).to_radians();
    let d_lon = (b.longitude() - a.longitude()).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude().to_radians().cos()
            * b.latitude().to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Distance in meters, as used by geofence radius checks
#[inline]
pub fn distance_m<A, B>(a: &A, b: &B) -> f64
where
    A: Coordinates + ?Sized,
    B: Coordinates + ?Sized,
{
    distance_km(a, b) * 1000.0
}

/// Offset a coordinate northwards by `meters` (test and replay helper)
pub fn offset_north(latitude: f64, meters: f64) -> f64 {
    latitude + (meters / 1000.0 / EARTH_RADIUS_KM).to_degrees()
}
