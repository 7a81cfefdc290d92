//! Nested-scheme HEALPix pixel indexing.
//!
//! Maps sky positions onto the discrete spherical tessellation that skymap
//! probability arrays are defined over (Gorski et al. 2005, nested
//! ordering). Pixel indices are only meaningful at a single resolution:
//! callers re-derive indices at each skymap's own order rather than
//! comparing indices across grids.

use skymatch_core::constants::{DEG_TO_RAD, PI, TWOPI};
use skymatch_core::math::angular_separation_deg;
use skymatch_core::{CoreError, CoreResult, SkyPosition};
use std::collections::HashSet;

/// Highest supported HEALPix order (nside = 2^29), matching the finest
/// multi-order tiles seen in upstream localizations.
pub const MAX_ORDER: u32 = 29;

/// Pixel count of the full sphere at a given nside.
pub fn npix_for_nside(nside: u64) -> u64 {
    12 * nside * nside
}

/// HEALPix order for a power-of-two nside.
pub fn order_for_nside(nside: u64) -> u32 {
    nside.trailing_zeros()
}

/// Infer the nside of a flat probability array from its length.
///
/// Returns `None` unless the length is exactly `12 * nside^2` for a
/// power-of-two nside no finer than [`MAX_ORDER`].
pub fn nside_from_len(len: usize) -> Option<u64> {
    if len == 0 || len % 12 != 0 {
        return None;
    }
    let nside_sq = (len / 12) as u64;
    let nside = libm::sqrt(nside_sq as f64) as u64;
    // Integer sqrt truncation can land one low.
    let nside = if (nside + 1) * (nside + 1) == nside_sq {
        nside + 1
    } else {
        nside
    };
    if nside * nside != nside_sq || !nside.is_power_of_two() {
        return None;
    }
    if order_for_nside(nside) > MAX_ORDER {
        return None;
    }
    Some(nside)
}

/// Map raw (RA, Dec) coordinates in degrees to a nested pixel index.
///
/// Validates the inputs: positions arriving through deserialization bypass
/// [`SkyPosition`]'s constructor, so the index re-checks rather than
/// indexing garbage.
pub fn pixel_for_coords(order: u32, ra_deg: f64, dec_deg: f64) -> CoreResult<u64> {
    if !ra_deg.is_finite() {
        return Err(CoreError::invalid_coordinate(format!(
            "right ascension must be finite, got {}",
            ra_deg
        )));
    }
    if !dec_deg.is_finite() || !(-90.0..=90.0).contains(&dec_deg) {
        return Err(CoreError::invalid_coordinate(format!(
            "declination must be within [-90, 90] degrees, got {}",
            dec_deg
        )));
    }
    Ok(ang_to_pixel(order, ra_deg, dec_deg))
}

/// Map a sky position to its nested pixel index at the given order.
pub fn position_to_pixel(position: &SkyPosition, order: u32) -> CoreResult<u64> {
    pixel_for_coords(order, position.ra_deg(), position.dec_deg())
}

/// Map a sky position to the set of candidate pixels at the given order.
///
/// With a positive uncertainty radius this is a disc query: every pixel
/// whose extent may overlap the radius is returned (conservative — extra
/// pixels are possible, missed pixels are not). An exact position yields
/// the singleton from [`position_to_pixel`]. The result is sorted so that
/// repeated evaluations of the same alert walk pixels in the same order.
pub fn position_to_pixel_set(position: &SkyPosition, order: u32) -> CoreResult<Vec<u64>> {
    let center = position_to_pixel(position, order)?;

    let radius_deg = match position.uncertainty_deg() {
        Some(r) if r > 0.0 => r,
        _ => return Ok(vec![center]),
    };

    let mut pixels = query_disc(order, position.ra_deg(), position.dec_deg(), radius_deg);
    pixels.insert(center);

    let mut pixels: Vec<u64> = pixels.into_iter().collect();
    pixels.sort_unstable();
    Ok(pixels)
}

/// Convert (RA, Dec) in degrees to a nested pixel index. Inputs must be
/// pre-validated.
fn ang_to_pixel(order: u32, ra_deg: f64, dec_deg: f64) -> u64 {
    let ra_deg = ((ra_deg % 360.0) + 360.0) % 360.0;
    let phi = ra_deg * DEG_TO_RAD;
    let z = libm::sin(dec_deg * DEG_TO_RAD);
    let nside = 1u64 << order;
    let (face, ix, iy) = face_and_position(phi, z, nside);
    let pixel_in_face = interleave_xy(ix, iy, order);
    face as u64 * nside * nside + pixel_in_face
}

/// Sample the disc on a half-pixel grid and collect every pixel hit.
///
/// Padding by one pixel size on both the declination band and the distance
/// test keeps the result conservative for pixels straddling the boundary.
fn query_disc(order: u32, ra_deg: f64, dec_deg: f64, radius_deg: f64) -> HashSet<u64> {
    let nside = 1u64 << order;

    // Mean pixel side in degrees: sqrt of the per-pixel solid angle.
    let pixel_size_deg = 58.6 / nside as f64;
    let step = pixel_size_deg * 0.5;

    let mut pixels = HashSet::new();

    let dec_min = (dec_deg - radius_deg - pixel_size_deg).max(-90.0);
    let dec_max = (dec_deg + radius_deg + pixel_size_deg).min(90.0);

    let mut dec = dec_min;
    while dec <= dec_max {
        // RA spacing widens toward the poles as meridians converge.
        let cos_dec = libm::cos(dec * PI / 180.0).max(0.01);
        let ra_step = step / cos_dec;

        let ra_span = if libm::fabs(dec) > 89.0 {
            360.0
        } else {
            (radius_deg / cos_dec).min(180.0) * 2.0
        };

        let mut ra = ra_deg - ra_span / 2.0;
        let ra_end = ra_deg + ra_span / 2.0;
        while ra <= ra_end {
            let ra_norm = ((ra % 360.0) + 360.0) % 360.0;

            let dist = angular_separation_deg(ra_deg, dec_deg, ra_norm, dec);
            if dist <= radius_deg + pixel_size_deg {
                pixels.insert(ang_to_pixel(order, ra_norm, dec));
            }

            ra += ra_step;
        }

        dec += step;
    }

    pixels
}

/// Locate the base face containing the point and the (ix, iy) grid position
/// within it.
fn face_and_position(phi: f64, z: f64, nside: u64) -> (u32, u64, u64) {
    let z_abs = libm::fabs(z);
    let tt = phi_to_tt(phi);
    if z_abs <= 2.0 / 3.0 {
        equatorial_face(tt, z, nside)
    } else {
        polar_face(tt, z, z_abs, nside)
    }
}

/// Normalize phi into the 0..4 quadrant coordinate.
fn phi_to_tt(phi: f64) -> f64 {
    let phi_norm = if phi < 0.0 { phi + TWOPI } else { phi };
    phi_norm * 2.0 / PI
}

/// Face and position in the equatorial belt (|z| <= 2/3).
fn equatorial_face(tt: f64, z: f64, nside: u64) -> (u32, u64, u64) {
    let temp1 = nside as f64 * (0.5 + tt);
    let temp2 = nside as f64 * z * 0.75;
    let jp = (temp1 - temp2) as i64;
    let jm = (temp1 + temp2) as i64;
    let nside_i = nside as i64;
    let ifp = jp / nside_i;
    let ifm = jm / nside_i;
    let face = equatorial_face_number(ifp, ifm);
    let ix = jm - (face as i64 % 4) * nside_i;
    let iy = nside_i - 1 - (jp - (face as i64 / 4) * nside_i);
    (face, ix as u64, iy as u64)
}

fn equatorial_face_number(ifp: i64, ifm: i64) -> u32 {
    match (ifp, ifm) {
        (4, _) => ((ifm + 4) % 4) as u32,
        (_, 4) => ((ifp + 4) % 4 + 4) as u32,
        _ if ifp == ifm => (ifp + 4) as u32,
        _ if ifp < ifm => ifp as u32,
        _ => (ifm + 8) as u32,
    }
}

/// Face and position in the polar caps (|z| > 2/3).
fn polar_face(tt: f64, z: f64, z_abs: f64, nside: u64) -> (u32, u64, u64) {
    let tp = tt - libm::floor(tt);
    let tmp = nside as f64 * libm::sqrt(3.0 * (1.0 - z_abs));
    let jp = ((tp * tmp) as i64).min(nside as i64 - 1);
    let jm = (((1.0 - tp) * tmp) as i64).min(nside as i64 - 1);
    let ntt = libm::floor(tt) as u32;
    let face_offset = if z > 0.0 { 0 } else { 8 };
    let face = (ntt % 4) + face_offset;
    let (ix, iy) = if z > 0.0 {
        (nside as i64 - jm - 1, nside as i64 - jp - 1)
    } else {
        (jp, jm)
    };
    (face, ix as u64, iy as u64)
}

/// Z-order (Morton) interleave of the in-face grid coordinates.
fn interleave_xy(ix: u64, iy: u64, order: u32) -> u64 {
    let mut result: u64 = 0;
    for i in 0..order {
        let bit_x = (ix >> i) & 1;
        let bit_y = (iy >> i) & 1;
        result |= (bit_x << (2 * i)) | (bit_y << (2 * i + 1));
    }
    result
}
