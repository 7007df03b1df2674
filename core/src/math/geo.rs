//! Flat-earth degree/metre conversions used for radius queries and grid spacing.

/// Metres per degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Lower bound on the longitude cosine correction, keeps polar queries finite.
pub const MIN_COS_LATITUDE: f64 = 0.01;

/// Longitude scale factor at `latitude_deg`, clamped away from zero.
pub fn longitude_scale(latitude_deg: f64) -> f64 {
    latitude_deg.to_radians().cos().abs().max(MIN_COS_LATITUDE)
}

/// Half-widths in degrees (lat, lon) of a box of `radius_m` around `latitude_deg`.
pub fn radius_to_degrees(latitude_deg: f64, radius_m: f64) -> (f64, f64) {
    let lat_delta = radius_m / METERS_PER_DEGREE;
    let lon_delta = radius_m / (METERS_PER_DEGREE * longitude_scale(latitude_deg));
    (lat_delta, lon_delta)
}

/// Ground extent in metres (north-south, east-west) of a degree span.
pub fn span_to_meters(lat_span_deg: f64, lon_span_deg: f64, mean_latitude_deg: f64) -> (f64, f64) {
    let north_south = lat_span_deg.abs() * METERS_PER_DEGREE;
    let east_west = lon_span_deg.abs() * METERS_PER_DEGREE * longitude_scale(mean_latitude_deg);
    (north_south, east_west)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equator_radius_is_symmetric() {
        let (lat, lon) = radius_to_degrees(0.0, 111.0);
        assert!((lat - 0.001).abs() < 1e-12);
        assert!((lon - 0.001).abs() < 1e-12);
    }

    #[test]
    fn pole_correction_is_clamped() {
        let (_, lon) = radius_to_degrees(90.0, 111.0);
        assert!((lon - 0.1).abs() < 1e-9);
        assert!(lon.is_finite());
    }

    #[test]
    fn span_uses_cosine_for_longitude() {
        let (ns, ew) = span_to_meters(0.01, 0.01, 60.0);
        assert!((ns - 1110.0).abs() < 1e-6);
        assert!((ew - 555.0).abs() < 1e-6);
    }
}
