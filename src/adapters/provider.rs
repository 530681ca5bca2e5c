//! Provider seam and the API-Sports REST client behind it.

use super::payload::{decode_entity, decode_occurrences};
use super::rate_limit::TokenBucket;
use crate::config::ProviderConfig;
use crate::domain::{EntityId, EntitySnapshot, Occurrence};
use crate::error::{Result, SyncError};
use crate::retry::Backoff;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Upstream source of entity and occurrence snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Current state of one entity; `None` when the provider does not know it.
    async fn fetch_entity(&self, entity_id: EntityId) -> Result<Option<EntitySnapshot>>;

    /// Full occurrence list of one entity as currently reported.
    async fn fetch_occurrences(&self, entity_id: EntityId) -> Result<Vec<Occurrence>>;
}

const USER_AGENT: &str = "fixture-sync/0.1";
const API_KEY_HEADER: &str = "x-apisports-key";

enum Failure {
    Retryable(SyncError, Option<Duration>),
    Fatal(SyncError),
}

/// Parse a `Retry-After` value in seconds, clamped to 1..=60s.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<f64>().ok()?;
    if !secs.is_finite() {
        return None;
    }
    Some(Duration::from_secs_f64(secs.clamp(1.0, 60.0)))
}

#[derive(Debug)]
pub struct ApiSportsClient {
    http: Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
    backoff: Backoff,
    limiter: Option<TokenBucket>,
}

impl ApiSportsClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| SyncError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
            backoff: Backoff::new(config.base_backoff_ms, config.max_backoff_ms),
            limiter: TokenBucket::from_config(config.rate_limit_per_min, config.effective_burst()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send_once(&self, path: &str, query: &[(&str, String)]) -> std::result::Result<Value, Failure> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Failure::Retryable(SyncError::Timeout(format!("GET {path}")), None)
                } else if e.is_connect() || e.is_request() {
                    Failure::Retryable(SyncError::Http(e), None)
                } else {
                    Failure::Fatal(SyncError::Http(e))
                }
            })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(Failure::Retryable(
                SyncError::RateLimited(format!("GET {path}")),
                retry_after,
            ));
        }
        if status.is_server_error() {
            return Err(Failure::Retryable(
                SyncError::ProviderUnavailable(format!("GET {path} status={status}")),
                None,
            ));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Failure::Fatal(SyncError::ProviderRejected(format!(
                "GET {path} status={status} body={}",
                text.chars().take(200).collect::<String>()
            ))));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| Failure::Fatal(SyncError::Decode(format!("GET {path}: {e}"))))
    }

    /// GET with pacing, bounded retries and backoff.
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let mut attempt = 0;
        loop {
            if let Some(limiter) = &self.limiter {
                limiter.acquire().await;
            }
            debug!(path, attempt, "provider request");

            match self.send_once(path, query).await {
                Ok(body) => return Ok(body),
                Err(Failure::Fatal(e)) => return Err(e),
                Err(Failure::Retryable(e, retry_after)) => {
                    if attempt >= self.max_retries {
                        return Err(e);
                    }
                    let wait = retry_after.unwrap_or_else(|| self.backoff.jittered(attempt));
                    warn!(
                        path,
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "provider request failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl ProviderClient for ApiSportsClient {
    async fn fetch_entity(&self, entity_id: EntityId) -> Result<Option<EntitySnapshot>> {
        let body = self.get_json("/games", &[("id", entity_id.to_string())]).await?;
        decode_entity(body)
    }

    async fn fetch_occurrences(&self, entity_id: EntityId) -> Result<Vec<Occurrence>> {
        let body = self
            .get_json("/games/events", &[("game", entity_id.to_string())])
            .await?;
        decode_occurrences(body)
    }
}
