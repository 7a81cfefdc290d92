//! Probability skymaps and their credible-level tables.
//!
//! A [`Skymap`] is a validated, normalized probability distribution over
//! the HEALPix grid plus a derived credible-level table: for each pixel,
//! the smallest cumulative-probability threshold whose credible region
//! includes that pixel. The table is computed once at construction by
//! ranking pixels by descending probability and accumulating; a stored map
//! is never mutated afterward.

use crate::errors::{EngineError, EngineResult};
use crate::healpix;
use skymatch_core::UtcInstant;
use std::fmt;

/// Identification and freshness metadata accompanying a raw probability
/// array at ingest.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SkymapMetadata {
    /// Source event identifier (unique among active maps).
    pub id: String,
    pub published_at: UtcInstant,
    pub expires_at: UtcInstant,
}

/// An immutable, validated probability skymap.
///
/// Constructed by [`Skymap::build`]; handed out by the store as
/// `Arc<Skymap>` so readers keep consistent access even across expiry.
#[derive(Debug)]
pub struct Skymap {
    pub id: String,
    /// HEALPix order of the grid (nside = 2^order).
    pub order: u32,
    /// Grid resolution; pixel count is `12 * nside^2`.
    pub nside: u64,
    /// Per-pixel probability mass, normalized to sum to 1.
    pub pixel_probabilities: Vec<f64>,
    /// Per-pixel smallest containing credible level, in (0, 1].
    pub credible_levels: Vec<f64>,
    pub published_at: UtcInstant,
    pub expires_at: UtcInstant,
}

impl Skymap {
    /// Validate a raw probability array and build the credible-level table.
    ///
    /// Rejects with `MalformedSkymap` when the length is not `12 * nside^2`
    /// for a power-of-two nside, when any value is negative or NaN, or when
    /// the total probability cannot be normalized (zero or non-finite sum).
    /// A finite positive sum outside `tolerance` of 1.0 is normalized with
    /// a warning rather than rejected.
    pub fn build(
        raw_probabilities: Vec<f64>,
        metadata: SkymapMetadata,
        tolerance: f64,
    ) -> EngineResult<Self> {
        let id = metadata.id;

        let nside = healpix::nside_from_len(raw_probabilities.len()).ok_or_else(|| {
            EngineError::malformed_skymap(
                Some(id.clone()),
                format!(
                    "array length {} is not 12*nside^2 for any power-of-two nside",
                    raw_probabilities.len()
                ),
            )
        })?;

        for (pixel, &p) in raw_probabilities.iter().enumerate() {
            if p.is_nan() || p < 0.0 {
                return Err(EngineError::malformed_skymap(
                    Some(id),
                    format!("pixel {} has invalid probability {}", pixel, p),
                ));
            }
        }

        let total: f64 = raw_probabilities.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return Err(EngineError::malformed_skymap(
                Some(id),
                format!("total probability {} cannot be normalized", total),
            ));
        }

        let mut probabilities = raw_probabilities;
        if (total - 1.0).abs() > tolerance {
            tracing::warn!(
                skymap_id = %id,
                total,
                "skymap probabilities sum outside tolerance, normalizing"
            );
            for p in &mut probabilities {
                *p /= total;
            }
        }

        let credible_levels = compute_credible_levels(&probabilities);

        Ok(Self {
            id,
            order: healpix::order_for_nside(nside),
            nside,
            pixel_probabilities: probabilities,
            credible_levels,
            published_at: metadata.published_at,
            expires_at: metadata.expires_at,
        })
    }

    pub fn npix(&self) -> u64 {
        healpix::npix_for_nside(self.nside)
    }

    /// Smallest credible level containing the given pixel.
    ///
    /// The pixel index must have been derived at this map's own order; an
    /// out-of-range index after that derivation is an internal defect and
    /// panics.
    pub fn credible_level(&self, pixel: u64) -> f64 {
        self.credible_levels[pixel as usize]
    }

    /// Whether the map's freshness window covers `as_of`
    /// (`published_at <= as_of < expires_at`).
    pub fn is_active_at(&self, as_of: UtcInstant) -> bool {
        self.published_at <= as_of && as_of < self.expires_at
    }
}

impl fmt::Display for Skymap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "skymap '{}' nside={} published={} expires={}",
            self.id, self.nside, self.published_at, self.expires_at
        )
    }
}

/// Rank pixels by descending probability and accumulate: each pixel's
/// credible level is the cumulative probability up to and including it.
///
/// Equal probabilities rank in pixel order, making the table deterministic.
fn compute_credible_levels(probabilities: &[f64]) -> Vec<f64> {
    let mut ranked: Vec<usize> = (0..probabilities.len()).collect();
    ranked.sort_by(|&a, &b| {
        probabilities[b]
            .partial_cmp(&probabilities[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut levels = vec![0.0; probabilities.len()];
    let mut cumulative = 0.0;
    for &pixel in &ranked {
        cumulative += probabilities[pixel];
        levels[pixel] = cumulative.min(1.0);
    }
    levels
}
