//! Distance and projection primitives.
//!
//! Distances are measured on the WGS-84 ellipsoid. Projections work in a locally
//! planar (lat, lon) approximation, which is what the antimeridian splitter and
//! the interpolation code expect.

use geo::{Distance, Geodesic, Point};

/// Ellipsoidal (WGS-84) distance in metres between two coordinates.
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    if lat1 == lat2 && lon1 == lon2 {
        return 0.0;
    }
    Geodesic.distance(Point::new(lon1, lat1), Point::new(lon2, lat2))
}

/// Coefficient in `[0, 1]` of the orthogonal projection of `(lat, lon)` onto the
/// segment `from -> to`.
pub fn projection_coefficient(
    lat: f64,
    lon: f64,
    from_lat: f64,
    from_lon: f64,
    to_lat: f64,
    to_lon: f64,
) -> f64 {
    let m_dist = (from_lat - to_lat).powi(2) + (from_lon - to_lon).powi(2);
    if m_dist == 0.0 {
        return 0.0;
    }
    let projection = scalar_multiplication(from_lat, from_lon, to_lat, to_lon, lat, lon);
    (projection / m_dist).clamp(0.0, 1.0)
}

/// Orthogonal projection of `(lat, lon)` onto the segment `from -> to`.
///
/// Returns the clamped coefficient together with the projected `(lat, lon)`.
pub fn projection(
    lat: f64,
    lon: f64,
    from_lat: f64,
    from_lon: f64,
    to_lat: f64,
    to_lon: f64,
) -> (f64, (f64, f64)) {
    let cf = projection_coefficient(lat, lon, from_lat, from_lon, to_lat, to_lon);
    let projected = (
        from_lat + (to_lat - from_lat) * cf,
        from_lon + (to_lon - from_lon) * cf,
    );
    (cf, projected)
}

/// Rounds to the nearest integer, ties toward positive infinity.
pub fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

/// Scalar product of the vectors AB and AC.
fn scalar_multiplication(xa: f64, ya: f64, xb: f64, yb: f64, xc: f64, yc: f64) -> f64 {
    (xb - xa) * (xc - xa) + (yb - ya) * (yc - ya)
}
