//! Containment decisions: alert positions against active skymaps.
//!
//! [`CrossmatchEngine::evaluate`] is the core filtering step. For one alert
//! it derives candidate pixels at each active map's own resolution, reads
//! the per-pixel credible levels, applies the acceptance threshold, and
//! aggregates the per-map results into a single decision. Evaluation is a
//! pure function of the alert and a store snapshot — replaying an alert
//! against an unchanged store yields an identical decision.

use crate::config::EngineConfig;
use crate::healpix;
use crate::skymap::Skymap;
use crate::store::SkymapStore;
use skymatch_core::{SkyPosition, UtcInstant};
use std::sync::Arc;

/// An incoming alert, immutable once received.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Alert {
    pub id: String,
    pub position: SkyPosition,
    pub detected_at: UtcInstant,
    pub source_stream_id: String,
}

/// One containment test of an alert against one skymap.
///
/// `credible_level` is the smallest credible region containing the alert's
/// candidate pixels; `None` when the pair was not evaluated (outside the
/// time-relevance window).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CrossmatchResult {
    pub alert_id: String,
    pub skymap_id: String,
    pub credible_level: Option<f64>,
    pub within_time_window: bool,
    pub accepted: bool,
    pub evaluated_at: UtcInstant,
}

/// The aggregate decision for one alert.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "outcome", rename_all = "snake_case"))]
pub enum DecisionOutcome {
    /// Accepted: the best-matching skymap and the credible level there.
    Matched {
        skymap_id: String,
        credible_level: f64,
    },
    /// Rejected: no active map contains the alert at the threshold.
    NoMatch,
    /// Rejected: the alert's position failed validation. Distinguished
    /// from `NoMatch` so downstream consumers can tell bad input from a
    /// clean miss.
    InvalidPosition,
}

/// Aggregate decision plus the full per-map audit trail.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AlertEvaluation {
    pub alert_id: String,
    pub evaluated_at: UtcInstant,
    pub outcome: DecisionOutcome,
    pub results: Vec<CrossmatchResult>,
}

impl AlertEvaluation {
    pub fn accepted(&self) -> bool {
        matches!(self.outcome, DecisionOutcome::Matched { .. })
    }

    /// An evaluation for an alert whose position failed validation.
    pub fn invalid_position(alert_id: impl Into<String>, evaluated_at: UtcInstant) -> Self {
        Self {
            alert_id: alert_id.into(),
            evaluated_at,
            outcome: DecisionOutcome::InvalidPosition,
            results: Vec::new(),
        }
    }
}

/// The crossmatch filtering engine.
///
/// Borrows alert and skymap data for the duration of one evaluation; owns
/// neither. The store is shared and read-only from here.
///
/// Positional uncertainty is handled optimistically: the alert's credible
/// level against a map is the minimum over its candidate pixel set, i.e.
/// "contained if any plausible pixel is contained". A probability-weighted
/// integral over the uncertainty disc would be stricter but costlier; the
/// optimistic minimum is the deliberate policy here.
pub struct CrossmatchEngine {
    store: Arc<SkymapStore>,
    config: EngineConfig,
}

impl CrossmatchEngine {
    pub fn new(store: Arc<SkymapStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<SkymapStore> {
        &self.store
    }

    /// Evaluate one alert against every active skymap at the configured
    /// acceptance threshold.
    pub fn evaluate(&self, alert: &Alert, as_of: UtcInstant) -> AlertEvaluation {
        self.evaluate_with_threshold(alert, as_of, self.config.acceptance_threshold)
    }

    /// Evaluate one alert with an explicit acceptance threshold.
    ///
    /// An alert with zero active skymaps yields a clean `NoMatch` with an
    /// empty result list, never an error.
    pub fn evaluate_with_threshold(
        &self,
        alert: &Alert,
        as_of: UtcInstant,
        acceptance_threshold: f64,
    ) -> AlertEvaluation {
        let snapshot = self.store.active_snapshot(as_of);

        let mut results = Vec::with_capacity(snapshot.len());
        // Best accepted match so far: (credible level, published_at, skymap id).
        let mut best: Option<(f64, UtcInstant, String)> = None;

        for map in &snapshot {
            let result = match self.evaluate_against_map(alert, map, as_of, acceptance_threshold) {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(
                        alert_id = %alert.id,
                        error = %err,
                        "alert rejected: invalid position"
                    );
                    return AlertEvaluation::invalid_position(alert.id.clone(), as_of);
                }
            };

            if result.accepted {
                let level = result
                    .credible_level
                    .expect("accepted result always carries a credible level");
                let candidate = (level, map.published_at, map.id.clone());
                best = Some(match best.take() {
                    None => candidate,
                    Some(current) => pick_better(current, candidate),
                });
            }

            results.push(result);
        }

        let outcome = match best {
            Some((credible_level, _, skymap_id)) => DecisionOutcome::Matched {
                skymap_id,
                credible_level,
            },
            None => DecisionOutcome::NoMatch,
        };

        AlertEvaluation {
            alert_id: alert.id.clone(),
            evaluated_at: as_of,
            outcome,
            results,
        }
    }

    /// One (alert, skymap) containment test.
    ///
    /// Outside the time-relevance window the pair is recorded as a
    /// non-match without computing a credible level. Inside it, candidate
    /// pixels are re-derived at this map's own order; the credible level is
    /// the minimum across the candidate set.
    fn evaluate_against_map(
        &self,
        alert: &Alert,
        map: &Skymap,
        evaluated_at: UtcInstant,
        acceptance_threshold: f64,
    ) -> skymatch_core::CoreResult<CrossmatchResult> {
        let window_start = map.published_at.add_seconds(-self.config.window_before_s);
        let window_end = map.published_at.add_seconds(self.config.window_after_s);
        let within_time_window =
            alert.detected_at >= window_start && alert.detected_at <= window_end;

        if !within_time_window {
            return Ok(CrossmatchResult {
                alert_id: alert.id.clone(),
                skymap_id: map.id.clone(),
                credible_level: None,
                within_time_window: false,
                accepted: false,
                evaluated_at,
            });
        }

        let pixels = healpix::position_to_pixel_set(&alert.position, map.order)?;
        let credible_level = pixels
            .iter()
            .map(|&pixel| map.credible_level(pixel))
            .fold(f64::INFINITY, f64::min);

        Ok(CrossmatchResult {
            alert_id: alert.id.clone(),
            skymap_id: map.id.clone(),
            credible_level: Some(credible_level),
            within_time_window: true,
            accepted: credible_level <= acceptance_threshold,
            evaluated_at,
        })
    }
}

/// Lower credible level wins; ties go to the more recently published map.
fn pick_better(
    current: (f64, UtcInstant, String),
    candidate: (f64, UtcInstant, String),
) -> (f64, UtcInstant, String) {
    if candidate.0 < current.0 || (candidate.0 == current.0 && candidate.1 > current.1) {
        candidate
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skymap::SkymapMetadata;

    fn meta(id: &str, published_mjd: f64, expires_mjd: f64) -> SkymapMetadata {
        SkymapMetadata {
            id: id.to_string(),
            published_at: UtcInstant::from_mjd(published_mjd),
            expires_at: UtcInstant::from_mjd(expires_mjd),
        }
    }

    fn alert_at(id: &str, position: SkyPosition, detected_mjd: f64) -> Alert {
        Alert {
            id: id.to_string(),
            position,
            detected_at: UtcInstant::from_mjd(detected_mjd),
            source_stream_id: "test-stream".to_string(),
        }
    }

    /// nside=1 probability array concentrating mass on the given pixel.
    fn probs_peaked_at(pixel: usize, peak: f64) -> Vec<f64> {
        let rest = (1.0 - peak) / 11.0;
        let mut probs = vec![rest; 12];
        probs[pixel] = peak;
        probs
    }

    fn engine_with_store() -> (CrossmatchEngine, Arc<SkymapStore>) {
        let store = Arc::new(SkymapStore::new(&EngineConfig::default()));
        let engine = CrossmatchEngine::new(Arc::clone(&store), EngineConfig::default());
        (engine, store)
    }

    /// A position inside pixel `target` at nside=1, found by scanning a
    /// coarse sky grid.
    fn position_in_pixel(target: u64) -> SkyPosition {
        for dec_step in 0..36 {
            for ra_step in 0..72 {
                let ra = ra_step as f64 * 5.0;
                let dec = -87.5 + dec_step as f64 * 5.0;
                let pos = SkyPosition::new(ra, dec).unwrap();
                if healpix::position_to_pixel(&pos, 0).unwrap() == target {
                    return pos;
                }
            }
        }
        panic!("no grid point found in pixel {}", target);
    }

    #[test]
    fn test_empty_store_is_clean_no_match() {
        let (engine, _store) = engine_with_store();
        let alert = alert_at("a1", SkyPosition::new(10.0, 10.0).unwrap(), 60_000.5);

        let eval = engine.evaluate(&alert, UtcInstant::from_mjd(60_000.5));
        assert_eq!(eval.outcome, DecisionOutcome::NoMatch);
        assert!(eval.results.is_empty());
        assert!(!eval.accepted());
    }

    #[test]
    fn test_high_pixel_accepted_low_pixel_rejected() {
        let (engine, store) = engine_with_store();
        let now = UtcInstant::from_mjd(60_000.5);

        // Pixel 0 holds 0.9 of the mass: its credible level is 0.9, every
        // other pixel only enters at the full-sky level.
        let mut probs = vec![0.0; 12];
        probs[0] = 0.9;
        probs[1] = 0.1;
        store.insert(probs, meta("GW1", 60_000.0, 60_002.0), now).unwrap();

        let hit = alert_at("hit", position_in_pixel(0), 60_000.5);
        let eval = engine.evaluate(&hit, now);
        assert_eq!(
            eval.outcome,
            DecisionOutcome::Matched {
                skymap_id: "GW1".to_string(),
                credible_level: 0.9,
            }
        );
        assert_eq!(eval.results.len(), 1);
        assert!(eval.results[0].accepted);
        assert_eq!(eval.results[0].credible_level, Some(0.9));

        let miss = alert_at("miss", position_in_pixel(1), 60_000.5);
        let eval = engine.evaluate(&miss, now);
        assert_eq!(eval.outcome, DecisionOutcome::NoMatch);
        assert_eq!(eval.results[0].credible_level, Some(1.0));
        assert!(!eval.results[0].accepted);
    }

    #[test]
    fn test_top_pixel_accepted_at_any_threshold_above_its_level() {
        let (engine, store) = engine_with_store();
        let now = UtcInstant::from_mjd(60_000.5);

        store
            .insert(probs_peaked_at(4, 0.5), meta("GW1", 60_000.0, 60_002.0), now)
            .unwrap();

        let alert = alert_at("a1", position_in_pixel(4), 60_000.5);
        let eval = engine.evaluate_with_threshold(&alert, now, 0.5);
        assert!(eval.accepted());

        let eval = engine.evaluate_with_threshold(&alert, now, 0.49);
        assert!(!eval.accepted());
    }

    #[test]
    fn test_tighter_of_two_overlapping_maps_wins() {
        let (engine, store) = engine_with_store();
        let now = UtcInstant::from_mjd(60_000.5);
        let alert_pos = position_in_pixel(0);

        // Map "wide": alert pixel at credible level 0.95.
        let mut wide = vec![0.0; 12];
        wide[1] = 0.90;
        wide[0] = 0.05;
        wide[2] = 0.05;
        store.insert(wide, meta("wide", 60_000.0, 60_002.0), now).unwrap();

        // Map "tight": alert pixel at credible level 0.5.
        let mut tight = vec![0.0; 12];
        tight[0] = 0.5;
        tight[1] = 0.5;
        store.insert(tight, meta("tight", 60_000.1, 60_002.0), now).unwrap();

        let alert = alert_at("a1", alert_pos, 60_000.5);
        let eval = engine.evaluate_with_threshold(&alert, now, 0.9);

        assert_eq!(
            eval.outcome,
            DecisionOutcome::Matched {
                skymap_id: "tight".to_string(),
                credible_level: 0.5,
            }
        );
        // Both pairs are recorded for audit.
        assert_eq!(eval.results.len(), 2);
        let wide_result = eval.results.iter().find(|r| r.skymap_id == "wide").unwrap();
        assert_eq!(wide_result.credible_level, Some(0.95));
        assert!(!wide_result.accepted);
    }

    #[test]
    fn test_tie_broken_by_most_recent_publication() {
        let (engine, store) = engine_with_store();
        let now = UtcInstant::from_mjd(60_000.5);
        let alert_pos = position_in_pixel(0);

        store
            .insert(probs_peaked_at(0, 0.6), meta("older", 60_000.0, 60_002.0), now)
            .unwrap();
        store
            .insert(probs_peaked_at(0, 0.6), meta("newer", 60_000.2, 60_002.0), now)
            .unwrap();

        let alert = alert_at("a1", alert_pos, 60_000.5);
        let eval = engine.evaluate(&alert, now);
        match eval.outcome {
            DecisionOutcome::Matched { ref skymap_id, .. } => assert_eq!(skymap_id, "newer"),
            ref other => panic!("expected a match, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_window_recorded_not_matched() {
        let (engine, store) = engine_with_store();
        let now = UtcInstant::from_mjd(60_005.0);

        // Published at 60_004.0; detection three days earlier is far
        // outside the relevance window even though the map is active.
        store
            .insert(probs_peaked_at(0, 0.9), meta("GW1", 60_004.0, 60_006.0), now)
            .unwrap();

        let alert = alert_at("a1", position_in_pixel(0), 60_001.0);
        let eval = engine.evaluate(&alert, now);

        assert_eq!(eval.outcome, DecisionOutcome::NoMatch);
        assert_eq!(eval.results.len(), 1);
        let result = &eval.results[0];
        assert!(!result.within_time_window);
        assert_eq!(result.credible_level, None);
        assert!(!result.accepted);
    }

    #[test]
    fn test_uncertain_position_uses_best_pixel() {
        let (engine, store) = engine_with_store();
        let now = UtcInstant::from_mjd(60_000.5);

        // Half the mass on pixel 0, the rest spread thin: pixel 0's
        // credible level is 0.5, every other pixel sits higher.
        store
            .insert(probs_peaked_at(0, 0.5), meta("GW1", 60_000.0, 60_002.0), now)
            .unwrap();

        let center = position_in_pixel(0);
        // A large uncertainty disc around a point in pixel 0 spans several
        // pixels; the optimistic minimum keeps the level at pixel 0's.
        let fuzzy =
            SkyPosition::with_uncertainty(center.ra_deg(), center.dec_deg(), 40.0).unwrap();
        let alert = alert_at("a1", fuzzy, 60_000.5);

        let eval = engine.evaluate(&alert, now);
        match eval.outcome {
            DecisionOutcome::Matched { credible_level, .. } => {
                assert!((credible_level - 0.5).abs() < 1e-12)
            }
            ref other => panic!("expected a match, got {:?}", other),
        }
        let level = eval.results[0].credible_level.unwrap();
        let exact_alert = alert_at("a2", center, 60_000.5);
        let exact_level = engine.evaluate(&exact_alert, now).results[0]
            .credible_level
            .unwrap();
        assert!(level <= exact_level + 1e-12);
    }

    #[test]
    fn test_idempotent_replay() {
        let (engine, store) = engine_with_store();
        let now = UtcInstant::from_mjd(60_000.5);
        store
            .insert(probs_peaked_at(3, 0.7), meta("GW1", 60_000.0, 60_002.0), now)
            .unwrap();
        store
            .insert(probs_peaked_at(5, 0.8), meta("GW2", 60_000.1, 60_002.0), now)
            .unwrap();

        let alert = alert_at(
            "a1",
            SkyPosition::with_uncertainty(140.0, 20.0, 8.0).unwrap(),
            60_000.5,
        );

        let first = engine.evaluate(&alert, now);
        let second = engine.evaluate(&alert, now);
        assert_eq!(first, second);
    }

    #[test]
    fn test_evaluation_at_map_own_resolution() {
        let (engine, store) = engine_with_store();
        let now = UtcInstant::from_mjd(60_000.5);

        // Two maps at different resolutions; each evaluation re-derives
        // pixels at the map's own order, so both match a peaked position.
        let coarse = probs_peaked_at(0, 0.6);
        store.insert(coarse, meta("coarse", 60_000.0, 60_002.0), now).unwrap();

        let pos = position_in_pixel(0);
        let fine_pixel = healpix::position_to_pixel(&pos, 2).unwrap() as usize;
        let mut fine = vec![0.0; 192];
        fine[fine_pixel] = 0.6;
        fine[(fine_pixel + 1) % 192] = 0.4;
        store.insert(fine, meta("fine", 60_000.1, 60_002.0), now).unwrap();

        let alert = alert_at("a1", pos, 60_000.5);
        let eval = engine.evaluate(&alert, now);
        assert_eq!(eval.results.len(), 2);
        assert!(eval.results.iter().all(|r| r.accepted));
    }
}
