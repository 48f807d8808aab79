//! Operator endpoints.

use std::collections::HashMap;

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::CacheStatsSnapshot;
use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::resilience::circuit_breaker::{CircuitState, CircuitView};

#[derive(Debug, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub running: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub persistence: &'static str,
    pub scheduler: SchedulerStatus,
    pub refresh_in_progress: bool,
    pub cached_entries: Option<usize>,
    pub uptime_secs: u64,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ServiceMetrics {
    pub cache: CacheStatsSnapshot,
    pub circuit_breakers: Vec<CircuitView>,
}

#[derive(Debug, Serialize)]
pub struct SourceStatus {
    pub key: String,
    pub url: String,
    pub timeout_ms: u64,
    pub circuit_state: CircuitState,
    pub record_count: usize,
    pub last_fetch: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SourceListing {
    pub sources: Vec<SourceStatus>,
    pub count: usize,
}

/// Liveness plus a summary of the moving parts. Never fails; a broken
/// store shows up as `degraded`.
pub async fn get_health(State(state): State<AppState>) -> Json<HealthStatus> {
    let aggregator = &state.aggregator;
    let persistence_ok = match aggregator.persistence().ping().await {
        Ok(()) => true,
        Err(error) => {
            tracing::warn!(error = %error, "Health check: persistence unavailable");
            false
        }
    };

    Json(HealthStatus {
        status: if persistence_ok { "ok" } else { "degraded" },
        persistence: if persistence_ok { "ok" } else { "unavailable" },
        scheduler: SchedulerStatus {
            enabled: state.scheduler.is_enabled(),
            running: state.scheduler.is_running(),
        },
        refresh_in_progress: aggregator.cache().is_refreshing(),
        cached_entries: aggregator.cache().len().await.ok(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn get_metrics(State(state): State<AppState>) -> Json<ServiceMetrics> {
    Json(ServiceMetrics {
        cache: state.aggregator.cache().stats(),
        circuit_breakers: state.aggregator.circuits().snapshot_all(),
    })
}

pub async fn get_circuits(State(state): State<AppState>) -> Json<Vec<CircuitView>> {
    Json(state.aggregator.circuits().snapshot_all())
}

pub async fn get_sources(State(state): State<AppState>) -> Result<Json<SourceListing>, ApiError> {
    let aggregator = &state.aggregator;
    let mut stats: HashMap<String, _> = aggregator
        .persistence()
        .source_stats()
        .await?
        .into_iter()
        .map(|s| (s.source_key.clone(), s))
        .collect();

    let sources: Vec<SourceStatus> = aggregator
        .sources()
        .iter()
        .map(|source| {
            let stored = stats.remove(&source.key);
            SourceStatus {
                key: source.key.clone(),
                url: source.endpoint.to_string(),
                timeout_ms: source.timeout.as_millis() as u64,
                circuit_state: aggregator.circuits().get(&source.key).state(),
                record_count: stored.as_ref().map_or(0, |s| s.record_count),
                last_fetch: stored.and_then(|s| s.last_fetch),
            }
        })
        .collect();

    Ok(Json(SourceListing {
        count: sources.len(),
        sources,
    }))
}

pub async fn clear_cache(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let removed = state.aggregator.cache().clear().await?;
    tracing::info!(removed, "Cache busted via admin API");
    Ok(StatusCode::NO_CONTENT)
}
