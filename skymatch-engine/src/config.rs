//! Engine configuration.

/// Static tuning knobs for the store and the crossmatch policy.
///
/// Built once at startup and passed in explicitly; there is no dynamic
/// reconfiguration path.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// An alert is accepted against a map when its credible level is at or
    /// below this threshold (0.9 = the 90% credible region).
    pub acceptance_threshold: f64,

    /// Allowed deviation of a raw probability array's sum from 1.0 before
    /// normalization kicks in.
    pub probability_tolerance: f64,

    /// Time-relevance window: seconds before a map's publication during
    /// which a detection still counts as related (covers clock skew between
    /// detection and publication).
    pub window_before_s: f64,

    /// Time-relevance window: seconds after a map's publication during
    /// which a detection still counts as related.
    pub window_after_s: f64,

    /// Grace period during which an already-expired map is still admitted
    /// at ingest, for late-arriving alerts inside the relevance window.
    pub stale_grace_s: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.9,
            probability_tolerance: 1e-3,
            window_before_s: 3_600.0,
            window_after_s: 172_800.0,
            stale_grace_s: 21_600.0,
        }
    }
}
