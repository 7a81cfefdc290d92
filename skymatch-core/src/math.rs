//! Spherical trigonometry helpers.

use crate::constants::{DEG_TO_RAD, RAD_TO_DEG};

/// Angular separation via the Vincenty formula, numerically stable at all
/// separations including antipodes and near-coincident points.
///
/// Inputs are the precomputed sines/cosines of the two latitudes and the
/// longitude difference in radians. Returns the separation in radians.
#[inline]
pub fn vincenty_angular_separation(
    sin_lat1: f64,
    cos_lat1: f64,
    sin_lat2: f64,
    cos_lat2: f64,
    delta_lon: f64,
) -> f64 {
    let (sin_delta_lon, cos_delta_lon) = libm::sincos(delta_lon);

    let num = libm::sqrt(
        (cos_lat2 * sin_delta_lon).powi(2)
            + (cos_lat1 * sin_lat2 - sin_lat1 * cos_lat2 * cos_delta_lon).powi(2),
    );
    let den = sin_lat1 * sin_lat2 + cos_lat1 * cos_lat2 * cos_delta_lon;

    libm::atan2(num, den)
}

/// Angular distance between two equatorial positions, in degrees.
pub fn angular_separation_deg(ra1_deg: f64, dec1_deg: f64, ra2_deg: f64, dec2_deg: f64) -> f64 {
    let (d1_sin, d1_cos) = libm::sincos(dec1_deg * DEG_TO_RAD);
    let (d2_sin, d2_cos) = libm::sincos(dec2_deg * DEG_TO_RAD);
    let delta_lon = (ra2_deg - ra1_deg) * DEG_TO_RAD;

    vincenty_angular_separation(d1_sin, d1_cos, d2_sin, d2_cos, delta_lon) * RAD_TO_DEG
}
