//! Normalization of upstream payloads into the engine's data model.
//!
//! The core never inspects portal-specific shapes: this adapter turns raw
//! skymap payloads into flat probability arrays plus metadata, and raw
//! candidate records into [`Alert`]s, deduplicating ids it has already
//! delivered. Skymap validation runs under a time budget so one oversized
//! map cannot stall the store's write path.

use crate::config::ServiceConfig;
use crate::errors::{ServiceError, ServiceResult};
use serde::Deserialize;
use skymatch_core::constants::FOUR_PI_SR;
use skymatch_core::{SkyPosition, UtcInstant};
use skymatch_engine::healpix;
use skymatch_engine::{Alert, Skymap, SkymapMetadata, SkymapStore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Multi-order tiles finer than this order are aggregated into their
/// ancestors here, bounding the flattened array at 786 432 pixels.
pub const FLATTEN_ORDER_CAP: u32 = 8;

/// A probability skymap as the portal serves it: either a flat per-pixel
/// array or multi-order (UNIQ, PROBDENSITY) tiles.
#[derive(Debug, Deserialize)]
pub struct SkymapPayload {
    pub id: String,
    /// Refinement name; a new version under the same id replaces the old.
    #[serde(default)]
    pub version: Option<String>,
    pub published_at: String,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub probabilities: Option<Vec<f64>>,
    #[serde(default)]
    pub tiles: Option<Vec<MultiOrderTile>>,
}

/// One multi-order tile: a NUNIQ-encoded pixel and its probability density
/// in sr^-1.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MultiOrderTile {
    pub uniq: u64,
    pub probdensity: f64,
}

/// A transient candidate as the portal serves it.
#[derive(Debug, Deserialize)]
pub struct AlertPayload {
    pub id: String,
    pub ra: f64,
    pub dec: f64,
    #[serde(default)]
    pub uncertainty: Option<f64>,
    #[serde(default, alias = "created_at")]
    pub detected_at: Option<String>,
    #[serde(default)]
    pub snr: Option<f64>,
    #[serde(default, alias = "origin")]
    pub stream: Option<String>,
}

/// Outcome of alert normalization.
#[derive(Debug)]
pub enum NormalizedAlert {
    /// Well-formed and new: hand to the evaluation pool.
    Evaluate(Alert),
    /// Malformed coordinates or timestamp: emit a "rejected, invalid
    /// input" decision, do not retry.
    Invalid { alert_id: String },
    /// Duplicate or filtered out: nothing to do.
    Skipped,
}

pub struct IngestionAdapter {
    store: Arc<SkymapStore>,
    min_snr: f64,
    skymap_ttl_days: f64,
    ingest_budget: Duration,
    seen_alerts: Mutex<HashSet<String>>,
    seen_skymaps: Mutex<HashSet<String>>,
}

impl IngestionAdapter {
    pub fn new(store: Arc<SkymapStore>, config: &ServiceConfig) -> Self {
        Self {
            store,
            min_snr: config.min_snr,
            skymap_ttl_days: config.skymap_ttl_days,
            ingest_budget: Duration::from_secs(config.ingest_budget_s),
            seen_alerts: Mutex::new(HashSet::new()),
            seen_skymaps: Mutex::new(HashSet::new()),
        }
    }

    /// Normalize one candidate payload into an [`Alert`].
    ///
    /// Already-seen ids and candidates below the SNR floor are skipped;
    /// malformed positions or timestamps are reported as `Invalid` so the
    /// engine's consumer can distinguish bad input from a clean miss.
    pub fn normalize_alert(&self, payload: AlertPayload, now: UtcInstant) -> NormalizedAlert {
        if let Some(snr) = payload.snr {
            if snr < self.min_snr {
                return NormalizedAlert::Skipped;
            }
        }

        {
            let mut seen = self.seen_alerts.lock().expect("seen-alerts lock poisoned");
            if !seen.insert(payload.id.clone()) {
                return NormalizedAlert::Skipped;
            }
        }

        let detected_at = match &payload.detected_at {
            Some(raw) => match UtcInstant::parse(raw) {
                Ok(t) => t,
                Err(err) => {
                    tracing::warn!(
                        alert_id = %payload.id,
                        error = %err,
                        "alert rejected: bad detection timestamp"
                    );
                    return NormalizedAlert::Invalid {
                        alert_id: payload.id,
                    };
                }
            },
            None => now,
        };

        let position = match payload.uncertainty {
            Some(radius) => SkyPosition::with_uncertainty(payload.ra, payload.dec, radius),
            None => SkyPosition::new(payload.ra, payload.dec),
        };
        let position = match position {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(
                    alert_id = %payload.id,
                    error = %err,
                    "alert rejected: invalid coordinates"
                );
                return NormalizedAlert::Invalid {
                    alert_id: payload.id,
                };
            }
        };

        NormalizedAlert::Evaluate(Alert {
            id: payload.id,
            position,
            detected_at,
            source_stream_id: payload.stream.unwrap_or_default(),
        })
    }

    /// Normalize and store one skymap payload.
    ///
    /// Returns `Ok(None)` when this exact (id, version) was already
    /// ingested. Validation and credible-level construction run on a
    /// blocking thread under the ingest time budget; on overrun the map is
    /// rejected and the store is left untouched.
    pub async fn ingest_skymap(
        &self,
        payload: SkymapPayload,
        now: UtcInstant,
    ) -> ServiceResult<Option<Arc<Skymap>>> {
        let dedup_key = match &payload.version {
            Some(version) => format!("{}/{}", payload.id, version),
            None => payload.id.clone(),
        };
        {
            let seen = self.seen_skymaps.lock().expect("seen-skymaps lock poisoned");
            if seen.contains(&dedup_key) {
                return Ok(None);
            }
        }

        let published_at = UtcInstant::parse(&payload.published_at)?;
        let expires_at = match &payload.expires_at {
            Some(raw) => UtcInstant::parse(raw)?,
            None => published_at.add_days(self.skymap_ttl_days),
        };

        let raw_probabilities = match (payload.probabilities, payload.tiles) {
            (Some(probabilities), _) => probabilities,
            (None, Some(tiles)) => flatten_tiles(&tiles)?,
            (None, None) => {
                return Err(ServiceError::payload(format!(
                    "skymap '{}' carries neither probabilities nor tiles",
                    payload.id
                )))
            }
        };

        let metadata = SkymapMetadata {
            id: payload.id.clone(),
            published_at,
            expires_at,
        };

        // Validation and credible-level construction run off the async
        // path under the time budget; the store commit below is a quick
        // lock-and-swap, so a timed-out map never touches the store.
        let tolerance = self.store.probability_tolerance();
        let build = tokio::task::spawn_blocking(move || {
            Skymap::build(raw_probabilities, metadata, tolerance)
        });
        let built = match tokio::time::timeout(self.ingest_budget, build).await {
            Err(_) => {
                return Err(ServiceError::IngestTimeout { id: payload.id });
            }
            Ok(joined) => joined.map_err(|e| {
                ServiceError::payload(format!("skymap validation task failed: {}", e))
            })??,
        };
        let map = self.store.insert_built(built, now)?;

        self.seen_skymaps
            .lock()
            .expect("seen-skymaps lock poisoned")
            .insert(dedup_key);
        Ok(Some(map))
    }
}

/// Flatten multi-order (UNIQ, PROBDENSITY) tiles into a fixed-resolution
/// probability array.
///
/// The target order is the finest tile order, capped at
/// [`FLATTEN_ORDER_CAP`]. In the nested scheme a tile's descendants and
/// ancestors at another order are bit shifts of its pixel index: coarser
/// tiles split their mass evenly over descendants, finer tiles add theirs
/// to the capped ancestor.
pub fn flatten_tiles(tiles: &[MultiOrderTile]) -> ServiceResult<Vec<f64>> {
    if tiles.is_empty() {
        return Err(ServiceError::payload("skymap has no tiles"));
    }

    let mut decoded = Vec::with_capacity(tiles.len());
    let mut finest: u32 = 0;
    for tile in tiles {
        let (order, ipix) = decode_uniq(tile.uniq)?;
        if !tile.probdensity.is_finite() || tile.probdensity < 0.0 {
            return Err(ServiceError::payload(format!(
                "tile uniq={} has invalid probability density {}",
                tile.uniq, tile.probdensity
            )));
        }
        finest = finest.max(order);
        decoded.push((order, ipix, tile.probdensity));
    }

    let target_order = finest.min(FLATTEN_ORDER_CAP);
    let target_npix = healpix::npix_for_nside(1u64 << target_order) as usize;
    let mut probabilities = vec![0.0; target_npix];

    for (order, ipix, probdensity) in decoded {
        // Density times the tile's own solid angle gives its probability.
        let tile_npix = healpix::npix_for_nside(1u64 << order) as f64;
        let probability = probdensity * FOUR_PI_SR / tile_npix;

        if order <= target_order {
            let shift = 2 * (target_order - order);
            let children = 1u64 << shift;
            let first = ipix << shift;
            let share = probability / children as f64;
            for child in first..first + children {
                probabilities[child as usize] += share;
            }
        } else {
            let ancestor = ipix >> (2 * (order - target_order));
            probabilities[ancestor as usize] += probability;
        }
    }

    Ok(probabilities)
}

/// Decode a NUNIQ pixel number into (order, nested pixel index).
fn decode_uniq(uniq: u64) -> ServiceResult<(u32, u64)> {
    if uniq < 4 {
        return Err(ServiceError::payload(format!(
            "invalid NUNIQ pixel number {}",
            uniq
        )));
    }
    let msb = 63 - uniq.leading_zeros();
    let order = (msb - 2) / 2;
    if order > healpix::MAX_ORDER {
        return Err(ServiceError::payload(format!(
            "NUNIQ order {} beyond supported maximum",
            order
        )));
    }
    let nside = 1u64 << order;
    let ipix = uniq - 4 * nside * nside;
    if ipix >= healpix::npix_for_nside(nside) {
        return Err(ServiceError::payload(format!(
            "NUNIQ pixel number {} out of range for order {}",
            uniq, order
        )));
    }
    Ok((order, ipix))
}
