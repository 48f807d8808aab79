//! Retrying HTTP fetcher.
//!
//! One logical fetch of one source: up to `retries.max_attempts` attempts,
//! each bounded by the source timeout, all bounded by `fetch.deadline_ms`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::header::ACCEPT;
use tokio::time::Instant;

use crate::config::{FetchConfig, RetryConfig};
use crate::fetch::types::{FetchError, FetchResult, Records, SourceDescriptor};
use crate::observability::metrics;
use crate::resilience::retries::{classify_status, is_retryable};
use crate::resilience::timeouts::{attempt_timeout, crosses_deadline};
use crate::resilience::{retry_decision, RetryDecision};

/// Fetches one source. The aggregator only sees this seam, so tests can
/// substitute scripted fetchers.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &SourceDescriptor) -> FetchResult;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryConfig,
    deadline: Duration,
}

impl HttpFetcher {
    pub fn new(fetch: &FetchConfig, retry: RetryConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(fetch.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            retry,
            deadline: fetch.deadline(),
        })
    }

    async fn attempt(&self, source: &SourceDescriptor, timeout: Duration) -> Result<Records, FetchError> {
        let request = async {
            let response = self
                .client
                .get(source.endpoint.clone())
                .header(ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| map_transport_error(e, timeout))?;

            if let Some(error) = classify_status(response.status().as_u16()) {
                return Err(error);
            }

            let body = response.bytes().await.map_err(|e| map_transport_error(e, timeout))?;
            decode_records(&body)
        };

        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        }
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, source: &SourceDescriptor) -> FetchResult {
        let attempted_at = Utc::now();
        let started = Instant::now();
        let deadline = started + self.deadline;
        let mut attempts = 0u32;

        let outcome = loop {
            let Some(timeout) = attempt_timeout(source.timeout, deadline) else {
                break Err(FetchError::Timeout(self.deadline));
            };

            attempts += 1;
            metrics::record_fetch_attempt(&source.key);

            let error = match self.attempt(source, timeout).await {
                Ok(records) => break Ok(records),
                Err(error) => error,
            };

            if !is_retryable(&error) {
                break Err(error);
            }

            let jitter: f64 = rand::thread_rng().gen();
            match retry_decision(attempts, &self.retry, jitter) {
                RetryDecision::GiveUp => break Err(error),
                RetryDecision::Retry { delay } => {
                    if crosses_deadline(delay, deadline) {
                        tracing::warn!(
                            source = %source.key,
                            attempt = attempts,
                            error = %error,
                            "Fetch deadline reached, giving up"
                        );
                        break Err(FetchError::Timeout(self.deadline));
                    }
                    tracing::info!(
                        source = %source.key,
                        attempt = attempts,
                        delay = ?delay,
                        error = %error,
                        "Retrying fetch"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        let duration = started.elapsed();
        match &outcome {
            Ok(records) => {
                metrics::record_fetch(&source.key, "ok", duration);
                tracing::debug!(
                    source = %source.key,
                    records = records.len(),
                    attempts,
                    duration_ms = duration.as_millis() as u64,
                    "Fetched source"
                );
            }
            Err(error) => {
                metrics::record_fetch(&source.key, "error", duration);
                tracing::warn!(
                    source = %source.key,
                    attempts,
                    error = %error,
                    "Fetch failed"
                );
            }
        }

        FetchResult {
            source_key: source.key.clone(),
            outcome,
            attempted_at,
            duration,
            attempts,
        }
    }
}

fn map_transport_error(error: reqwest::Error, timeout: Duration) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Network(error.to_string())
    }
}

/// Parse a response body. A JSON array yields its elements; any other JSON
/// value becomes a one-element list.
pub fn decode_records(body: &[u8]) -> Result<Records, FetchError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;

    Ok(match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    })
}
