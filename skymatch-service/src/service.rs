//! The polling crossmatch service.
//!
//! Each cycle: poll the portal for localization events observed since the
//! last one seen, re-ingest skymaps when anything new appeared, sweep
//! expired maps, fetch candidates created since the last refresh, and feed
//! them to the evaluation pool. One bad event, skymap, or candidate never
//! aborts the rest of the cycle.

use crate::client::PortalClient;
use crate::config::ServiceConfig;
use crate::errors::{ServiceError, ServiceResult};
use crate::ingest::{AlertPayload, IngestionAdapter, NormalizedAlert, SkymapPayload};
use crate::sink::DecisionSink;
use crate::workers::EvaluationPool;
use skymatch_core::UtcInstant;
use skymatch_engine::{AlertEvaluation, CrossmatchEngine, SkymapStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct CrossmatchService {
    client: PortalClient,
    adapter: IngestionAdapter,
    store: Arc<SkymapStore>,
    sink: Arc<DecisionSink>,
    pool: EvaluationPool,
    config: ServiceConfig,
    last_event_seen: UtcInstant,
    last_candidate_refresh: UtcInstant,
    skymaps_loaded: bool,
}

impl CrossmatchService {
    pub fn new(config: ServiceConfig) -> ServiceResult<Self> {
        let client = PortalClient::new(&config.portal_url, &config.api_token)?;

        let store = Arc::new(SkymapStore::new(&config.engine));
        let engine = Arc::new(CrossmatchEngine::new(
            Arc::clone(&store),
            config.engine.clone(),
        ));
        let adapter = IngestionAdapter::new(Arc::clone(&store), &config);

        let sink = Arc::new(if config.annotate {
            DecisionSink::Annotate(client.clone())
        } else {
            DecisionSink::Log
        });
        let pool = EvaluationPool::spawn(
            engine,
            Arc::clone(&sink),
            config.workers,
            config.channel_capacity,
        );

        let now = UtcInstant::now();
        let lookback = now.add_days(-config.lookback_days);

        Ok(Self {
            client,
            adapter,
            store,
            sink,
            pool,
            config,
            last_event_seen: lookback,
            last_candidate_refresh: now.add_days(-0.125),
            skymaps_loaded: false,
        })
    }

    /// Whether the portal is reachable and the token is accepted.
    pub async fn check_portal(&self) -> ServiceResult<()> {
        if !self.client.ping().await {
            return Err(ServiceError::transport(format!(
                "portal at {} not reachable",
                self.client.base_url()
            )));
        }
        if !self.client.auth_check().await {
            return Err(ServiceError::auth("portal rejected the API token"));
        }
        Ok(())
    }

    /// Poll until the shutdown signal fires, then drain the pool.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> ServiceResult<()> {
        let interval = Duration::from_secs(self.config.poll_interval_s);
        loop {
            if let Err(err) = self.poll_once().await {
                tracing::warn!(error = %err, "poll cycle failed; retrying next interval");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("shutting down; draining evaluation pool");
        self.pool.shutdown().await;
        Ok(())
    }

    /// One poll cycle. Public so operators can run a single pass.
    pub async fn poll_once(&mut self) -> ServiceResult<()> {
        let now = UtcInstant::now();

        // Anything observed strictly after the last event we acted on?
        let new_events = self
            .client
            .recent_events(&self.last_event_seen.add_seconds(1.0))
            .await?;

        if !self.skymaps_loaded || !new_events.is_empty() {
            tracing::info!(new_events = new_events.len(), "refreshing skymaps");
            self.refresh_skymaps(now).await?;
            self.skymaps_loaded = true;
            if let Some(latest) = new_events
                .iter()
                .map(|e| e.observed_at)
                .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            {
                self.last_event_seen = latest;
            }
        }

        self.store.expire_sweep(now);

        if self.store.is_empty() {
            tracing::debug!("no active skymaps; waiting");
            return Ok(());
        }

        let since = self.last_candidate_refresh;
        // Move the refresh mark before the query so nothing slips between.
        self.last_candidate_refresh = now;
        let candidates = self
            .client
            .recent_candidates(&since, &self.config.group_ids)
            .await?;

        let mut submitted = 0usize;
        for value in candidates {
            let payload: AlertPayload = match serde_json::from_value(value) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unparseable candidate");
                    continue;
                }
            };

            match self.adapter.normalize_alert(payload, now) {
                NormalizedAlert::Evaluate(alert) => {
                    if self.pool.submit(alert).await {
                        submitted += 1;
                    } else {
                        tracing::warn!("evaluation pool closed; dropping alert");
                    }
                }
                NormalizedAlert::Invalid { alert_id } => {
                    let evaluation = AlertEvaluation::invalid_position(alert_id, now);
                    if let Err(err) = self.sink.deliver(&evaluation).await {
                        tracing::warn!(error = %err, "failed to deliver invalid-input decision");
                    }
                }
                NormalizedAlert::Skipped => {}
            }
        }
        if submitted > 0 {
            tracing::info!(submitted, "alerts queued for evaluation");
        }

        Ok(())
    }

    /// Drain the evaluation pool and stop. Used by one-shot runs.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }

    /// Re-fetch and ingest skymaps for every event inside the lookback
    /// horizon. Per-map failures are logged and isolated.
    async fn refresh_skymaps(&self, now: UtcInstant) -> ServiceResult<()> {
        let horizon = now.add_days(-self.config.lookback_days);
        let events = self.client.recent_events(&horizon).await?;

        let mut ingested = 0usize;
        for event in &events {
            let Some(skymap_name) = &event.skymap_name else {
                continue;
            };

            let bytes = match self.client.download_skymap(&event.event_id, skymap_name).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        error = %err,
                        "skymap download failed"
                    );
                    continue;
                }
            };

            let payload: SkymapPayload = match serde_json::from_slice(&bytes) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        error = %err,
                        "skymap payload unparseable"
                    );
                    continue;
                }
            };

            match self.adapter.ingest_skymap(payload, now).await {
                Ok(Some(map)) => {
                    tracing::info!(skymap_id = %map.id, nside = map.nside, "skymap ingested");
                    ingested += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        error = %err,
                        "skymap rejected"
                    );
                }
            }
        }

        tracing::info!(
            events = events.len(),
            ingested,
            active = self.store.len(),
            "skymap refresh complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer) -> ServiceConfig {
        ServiceConfig {
            portal_url: server.uri(),
            api_token: "secret".to_string(),
            workers: 2,
            ..ServiceConfig::default()
        }
    }

    fn empty_page(key: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "data": {key: [], "totalMatches": 0}
        }))
    }

    async fn mount_event_with_skymap(server: &MockServer, dateobs: &str, probs: Vec<f64>) {
        let event = json!({
            "dateobs": dateobs,
            "aliases": ["LVC#S250101ab"],
            "localizations": [{"localization_name": "bayestar.json"}]
        });
        Mock::given(method("GET"))
            .and(path("/api/gcn_event"))
            .and(query_param("gcnTagKeep", "GW,BNS,NSBH,SVOM"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"events": [event], "totalMatches": 1}
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/gcn_event"))
            .and(query_param("gcnTagKeep", "Fermi"))
            .respond_with(empty_page("events"))
            .mount(server)
            .await;

        let skymap = json!({
            "id": "S250101ab",
            "version": "bayestar.json",
            "published_at": dateobs,
            "probabilities": probs,
        });
        Mock::given(method("GET"))
            .and(path_regex(r"^/api/localization/.*/download$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(skymap))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_poll_once_ingests_and_annotates() {
        let server = MockServer::start().await;

        // A skymap published "now" so candidates fall inside its windows.
        let published = UtcInstant::now().add_seconds(-600.0).to_string();
        // Concentrated map: pixel of (0,0) would vary, so spread mass so
        // that every pixel is accepted at threshold 1.0 via a generous
        // config below.
        mount_event_with_skymap(&server, &published, vec![1.0 / 12.0; 12]).await;

        let candidate = json!({
            "id": "ZTF25abc",
            "ra": 120.0,
            "dec": 30.0,
            "created_at": UtcInstant::now().to_string(),
            "snr": 9.5,
        });
        Mock::given(method("GET"))
            .and(path("/api/candidates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"candidates": [candidate], "totalMatches": 1}
            })))
            .mount(&server)
            .await;

        let annotation = Mock::given(method("POST"))
            .and(path("/api/sources/ZTF25abc/annotations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .expect(1);
        server.register(annotation).await;

        let mut config = test_config(&server);
        // Uniform map: each pixel's credible level is below 1.0 only at
        // full sky, so accept everything for this plumbing test.
        config.engine.acceptance_threshold = 1.0;

        let mut service = CrossmatchService::new(config).unwrap();
        service.poll_once().await.unwrap();
        assert_eq!(service.store.len(), 1);

        // Draining the pool guarantees delivery before we assert.
        service.shutdown().await;
        server.verify().await;
    }

    #[tokio::test]
    async fn test_poll_once_no_events_no_candidate_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/gcn_event"))
            .respond_with(empty_page("events"))
            .mount(&server)
            .await;
        // No /api/candidates mock: a query there would 404 and fail the
        // cycle, so a passing poll proves it was never made.

        let mut service = CrossmatchService::new(test_config(&server)).unwrap();
        service.poll_once().await.unwrap();
        assert!(service.store.is_empty());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_skymap_isolated_from_cycle() {
        let server = MockServer::start().await;
        let published = UtcInstant::now().add_seconds(-600.0).to_string();
        // Wrong array length: rejected at validation.
        mount_event_with_skymap(&server, &published, vec![0.1; 10]).await;
        Mock::given(method("GET"))
            .and(path("/api/candidates"))
            .respond_with(empty_page("candidates"))
            .mount(&server)
            .await;

        let mut service = CrossmatchService::new(test_config(&server)).unwrap();
        // The cycle itself succeeds; the bad map is logged and skipped.
        service.poll_once().await.unwrap();
        assert!(service.store.is_empty());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_candidate_gets_invalid_decision() {
        let server = MockServer::start().await;
        let published = UtcInstant::now().add_seconds(-600.0).to_string();
        mount_event_with_skymap(&server, &published, vec![1.0 / 12.0; 12]).await;

        let candidate = json!({
            "id": "BAD25x",
            "ra": 120.0,
            "dec": 95.0, // impossible declination
            "created_at": UtcInstant::now().to_string(),
            "snr": 9.5,
        });
        Mock::given(method("GET"))
            .and(path("/api/candidates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"candidates": [candidate], "totalMatches": 1}
            })))
            .mount(&server)
            .await;

        let invalid_annotation = Mock::given(method("POST"))
            .and(path("/api/sources/BAD25x/annotations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .expect(1);
        server.register(invalid_annotation).await;

        let mut service = CrossmatchService::new(test_config(&server)).unwrap();
        service.poll_once().await.unwrap();
        service.shutdown().await;
        server.verify().await;
    }
}
