//! Service configuration.

use skymatch_engine::EngineConfig;

/// Static configuration for the polling service, assembled once at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL of the upstream alert portal.
    pub portal_url: String,

    /// API token for the portal.
    pub api_token: String,

    /// Seconds between poll cycles.
    pub poll_interval_s: u64,

    /// How far back to look for localization events on a cold start.
    pub lookback_days: f64,

    /// Candidates below this signal-to-noise ratio are dropped before
    /// evaluation.
    pub min_snr: f64,

    /// Restrict candidate queries to these portal group ids (all groups
    /// when empty).
    pub group_ids: Vec<String>,

    /// Freshness window applied when an upstream skymap carries no
    /// explicit expiry.
    pub skymap_ttl_days: f64,

    /// Number of evaluation workers.
    pub workers: usize,

    /// Capacity of the alert channel feeding the workers.
    pub channel_capacity: usize,

    /// Per-skymap validation time budget, in seconds.
    pub ingest_budget_s: u64,

    /// Post decisions back to the portal; when false, decisions are only
    /// logged.
    pub annotate: bool,

    pub engine: EngineConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            portal_url: String::new(),
            api_token: String::new(),
            poll_interval_s: 20,
            lookback_days: 2.0,
            min_snr: 5.0,
            group_ids: Vec::new(),
            skymap_ttl_days: 2.0,
            workers: 4,
            channel_capacity: 256,
            ingest_budget_s: 10,
            annotate: true,
            engine: EngineConfig::default(),
        }
    }
}
