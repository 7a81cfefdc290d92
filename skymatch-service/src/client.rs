//! Token-authenticated HTTP client for the upstream alert portal.
//!
//! The portal wraps every JSON response in a `{"data": ...}` envelope and
//! paginates list endpoints with `pageNumber`/`numPerPage`/`totalMatches`.
//! Transport failures surface as [`ServiceError::Transport`]; the caller
//! retries on the next poll cycle.

use crate::errors::{ServiceError, ServiceResult};
use serde_json::Value;
use skymatch_core::UtcInstant;
use skymatch_engine::AlertEvaluation;
use std::time::{Duration, Instant};

/// Responses slower than this are logged as a warning.
const SLOW_RESPONSE_THRESHOLD: Duration = Duration::from_secs(5);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const PAGE_SIZE: usize = 1000;

/// Pause between successive pages of one paginated query.
const PAGE_PAUSE: Duration = Duration::from_millis(300);

/// A localization event as listed by the portal.
#[derive(Debug, Clone)]
pub struct EventSummary {
    /// Portal event identifier (the observation timestamp string).
    pub event_id: String,
    pub observed_at: UtcInstant,
    /// Human-facing alias, when the portal carries one.
    pub alias: Option<String>,
    /// Name of the most recent localization attached to the event.
    pub skymap_name: Option<String>,
}

#[derive(Clone)]
pub struct PortalClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl PortalClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> ServiceResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("skymatch/{}", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the portal answers at all.
    pub async fn ping(&self) -> bool {
        let url = format!("{}/api/sysinfo", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Whether the configured token is accepted.
    pub async fn auth_check(&self) -> bool {
        let url = format!("{}/api/config", self.base_url);
        match self
            .http
            .get(&url)
            .header("Authorization", format!("token {}", self.token))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// GET a portal endpoint and unwrap the `data` envelope.
    async fn get_data(&self, path: &str, params: &[(String, String)]) -> ServiceResult<Value> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let started = Instant::now();

        let response = self
            .http
            .get(&url)
            .query(params)
            .header("Authorization", format!("token {}", self.token))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::transport(format!("portal not responding to {}", path))
                } else {
                    ServiceError::transport(format!("request to {} failed: {}", path, e))
                }
            })?;

        let latency = started.elapsed();
        if latency > SLOW_RESPONSE_THRESHOLD {
            tracing::warn!(
                path,
                latency_s = latency.as_secs_f64(),
                "portal responding slowly"
            );
        }

        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            ServiceError::payload(format!("non-JSON response from {}: {}", path, e))
        })?;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ServiceError::auth(format!(
                "portal rejected token on {}",
                path
            )));
        }
        if !status.is_success() {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no message")
                .to_string();
            return Err(ServiceError::transport(format!(
                "{} returned {}: {}",
                path, status, message
            )));
        }

        body.get("data")
            .cloned()
            .ok_or_else(|| ServiceError::payload(format!("missing data envelope from {}", path)))
    }

    /// Fetch every page of a paginated list endpoint.
    async fn fetch_all_pages(
        &self,
        path: &str,
        base_params: &[(String, String)],
        item_key: &str,
    ) -> ServiceResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut page = 1usize;

        loop {
            let mut params = base_params.to_vec();
            params.push(("pageNumber".to_string(), page.to_string()));
            params.push(("numPerPage".to_string(), PAGE_SIZE.to_string()));

            let data = self.get_data(path, &params).await?;
            let page_items = data
                .get(item_key)
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    ServiceError::payload(format!("missing '{}' in {} response", item_key, path))
                })?;
            items.extend(page_items.iter().cloned());

            let total = data
                .get("totalMatches")
                .and_then(Value::as_u64)
                .unwrap_or(items.len() as u64);
            if total as usize <= items.len() {
                break;
            }
            page += 1;
            tokio::time::sleep(PAGE_PAUSE).await;
        }

        Ok(items)
    }

    /// Localization events observed since `since`, newest first as the
    /// portal returns them.
    ///
    /// Two tag-filtered queries, matching the upstream selection policy:
    /// compact-binary events of any size, plus gamma-ray events only when
    /// tightly localized.
    pub async fn recent_events(&self, since: &UtcInstant) -> ServiceResult<Vec<EventSummary>> {
        let start = ("startDate".to_string(), since.to_string());
        let no_content = ("excludeNoticeContent".to_string(), "true".to_string());

        let mut raw = self
            .fetch_all_pages(
                "/api/gcn_event",
                &[
                    start.clone(),
                    no_content.clone(),
                    ("gcnTagKeep".to_string(), "GW,BNS,NSBH,SVOM".to_string()),
                    (
                        "gcnTagRemove".to_string(),
                        "BBH,MLy,Terrestrial".to_string(),
                    ),
                ],
                "events",
            )
            .await?;

        raw.extend(
            self.fetch_all_pages(
                "/api/gcn_event",
                &[
                    start,
                    no_content,
                    ("gcnTagKeep".to_string(), "Fermi".to_string()),
                    (
                        "localizationTagKeep".to_string(),
                        "< 1000 sq. deg.".to_string(),
                    ),
                ],
                "events",
            )
            .await?,
        );

        let mut events = Vec::with_capacity(raw.len());
        for value in raw {
            match parse_event(&value) {
                Ok(event) => events.push(event),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unparseable event");
                }
            }
        }
        Ok(events)
    }

    /// Download the raw skymap payload attached to an event.
    pub async fn download_skymap(&self, event_id: &str, name: &str) -> ServiceResult<Vec<u8>> {
        let url = format!(
            "{}/api/localization/{}/name/{}/download",
            self.base_url, event_id, name
        );
        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("token {}", self.token))
            .send()
            .await
            .map_err(|e| ServiceError::transport(format!("skymap download failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::transport(format!(
                "skymap download for '{}' returned {}",
                event_id,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ServiceError::transport(format!("skymap download truncated: {}", e)))?;
        Ok(bytes.to_vec())
    }

    /// Candidate alerts created since `since`.
    pub async fn recent_candidates(
        &self,
        since: &UtcInstant,
        group_ids: &[String],
    ) -> ServiceResult<Vec<Value>> {
        let mut params = vec![("startDate".to_string(), since.to_string())];
        if !group_ids.is_empty() {
            params.push(("groupIDs".to_string(), group_ids.join(",")));
        }
        self.fetch_all_pages("/api/candidates", &params, "candidates")
            .await
    }

    /// Post an evaluation back to the portal as an annotation on the
    /// source. The portal treats re-posts for the same alert as updates,
    /// so duplicate deliveries are harmless.
    pub async fn annotate(&self, evaluation: &AlertEvaluation) -> ServiceResult<()> {
        let url = format!(
            "{}/api/sources/{}/annotations",
            self.base_url, evaluation.alert_id
        );
        let body = serde_json::json!({
            "origin": "skymatch",
            "data": evaluation,
        });

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("token {}", self.token))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::transport(format!("annotation post failed: {}", e)))?;

        let status = response.status();
        // Conflict means an identical annotation already exists; the
        // consumer is idempotent by contract.
        if status.is_success() || status == reqwest::StatusCode::CONFLICT {
            Ok(())
        } else {
            Err(ServiceError::transport(format!(
                "annotation for '{}' returned {}",
                evaluation.alert_id, status
            )))
        }
    }
}

fn parse_event(value: &Value) -> ServiceResult<EventSummary> {
    let event_id = value
        .get("dateobs")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::payload("event missing 'dateobs'"))?
        .to_string();
    let observed_at = UtcInstant::parse(&event_id)?;

    let alias = value
        .get("aliases")
        .and_then(Value::as_array)
        .and_then(|aliases| aliases.first())
        .and_then(Value::as_str)
        .map(|alias| alias.rsplit('#').next().unwrap_or(alias).to_string());

    // The first localization listed is the most recent refinement.
    let skymap_name = value
        .get("localizations")
        .and_then(Value::as_array)
        .and_then(|locs| locs.first())
        .and_then(|loc| loc.get("localization_name"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(EventSummary {
        event_id,
        observed_at,
        alias,
        skymap_name,
    })
}
