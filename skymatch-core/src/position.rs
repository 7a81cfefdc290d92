//! Validated equatorial sky positions.

use crate::errors::{CoreError, CoreResult};
use crate::math::angular_separation_deg;
use std::fmt;

/// An immutable equatorial position with an optional positional-uncertainty
/// radius.
///
/// Construction validates the coordinates: right ascension must be finite
/// (and is normalized into [0, 360)), declination must lie in [-90, +90],
/// and the uncertainty radius, when present, must be finite and
/// non-negative. A successfully constructed `SkyPosition` is therefore
/// always safe to hand to the pixel index.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SkyPosition {
    ra_deg: f64,
    dec_deg: f64,
    uncertainty_deg: Option<f64>,
}

impl SkyPosition {
    /// An exact position (no uncertainty radius).
    pub fn new(ra_deg: f64, dec_deg: f64) -> CoreResult<Self> {
        Self::build(ra_deg, dec_deg, None)
    }

    /// A position with a positional-uncertainty radius in degrees.
    ///
    /// A zero radius is equivalent to an exact position.
    pub fn with_uncertainty(ra_deg: f64, dec_deg: f64, radius_deg: f64) -> CoreResult<Self> {
        Self::build(ra_deg, dec_deg, Some(radius_deg))
    }

    fn build(ra_deg: f64, dec_deg: f64, uncertainty_deg: Option<f64>) -> CoreResult<Self> {
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
        if let Some(radius) = uncertainty_deg {
            if !radius.is_finite() || radius < 0.0 {
                return Err(CoreError::invalid_coordinate(format!(
                    "uncertainty radius must be finite and non-negative, got {}",
                    radius
                )));
            }
        }

        let ra_norm = ((ra_deg % 360.0) + 360.0) % 360.0;

        Ok(Self {
            ra_deg: ra_norm,
            dec_deg,
            uncertainty_deg,
        })
    }

    /// Right ascension in degrees, normalized to [0, 360).
    pub fn ra_deg(&self) -> f64 {
        self.ra_deg
    }

    /// Declination in degrees, in [-90, +90].
    pub fn dec_deg(&self) -> f64 {
        self.dec_deg
    }

    /// Positional-uncertainty radius in degrees, if any.
    pub fn uncertainty_deg(&self) -> Option<f64> {
        self.uncertainty_deg
    }

    /// True when the position carries no usable uncertainty radius.
    pub fn is_exact(&self) -> bool {
        match self.uncertainty_deg {
            None => true,
            Some(r) => r <= 0.0,
        }
    }

    /// Angular distance to another position, in degrees.
    pub fn separation_deg(&self, other: &SkyPosition) -> f64 {
        angular_separation_deg(self.ra_deg, self.dec_deg, other.ra_deg, other.dec_deg)
    }
}

impl fmt::Display for SkyPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.uncertainty_deg {
            Some(r) if r > 0.0 => {
                write!(
                    f,
                    "({:.6}, {:+.6}) ±{:.4}°",
                    self.ra_deg, self.dec_deg, r
                )
            }
            _ => write!(f, "({:.6}, {:+.6})", self.ra_deg, self.dec_deg),
        }
    }
}
