//! Data API handlers (`/api/v1`).

use axum::{
    extract::{rejection::PathRejection, rejection::QueryRejection, Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::aggregator::{AggregateError, AggregateResult, RefreshReport, Trigger};
use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::persistence::{AuditEntry, RecordPage, StoredRecord};

pub const X_CACHE: &str = "x-cache";

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 200;
const DEFAULT_LOG_LIMIT: u32 = 50;
const MAX_LOG_LIMIT: u32 = 500;

#[derive(Serialize)]
struct AggregateBody<'a> {
    cache_status: &'static str,
    #[serde(flatten)]
    aggregate: &'a AggregateResult,
}

pub async fn get_aggregate(State(state): State<AppState>) -> Result<Response, ApiError> {
    let read = state.aggregator.get_aggregate().await?;
    let cache_status = read.status.as_str();

    let mut response = Json(AggregateBody {
        cache_status,
        aggregate: &read.value,
    })
    .into_response();
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static(cache_status));
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    pub source_key: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub async fn list_records(
    State(state): State<AppState>,
    query: Result<Query<RecordsQuery>, QueryRejection>,
) -> Result<Json<RecordPage>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let page = query.page.unwrap_or(1);
    if page < 1 {
        return Err(ApiError::BadRequest("page must be at least 1".to_string()));
    }
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(ApiError::BadRequest(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let records = state
        .aggregator
        .persistence()
        .paginate_records(query.source_key.as_deref(), page, page_size)
        .await?;
    Ok(Json(records))
}

pub async fn get_record(
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
) -> Result<Json<StoredRecord>, ApiError> {
    let Path(id) = id.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    state
        .aggregator
        .persistence()
        .get_record(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Record {id} not found")))
}

/// Start a refresh in the background and return immediately.
pub async fn trigger_refresh(State(state): State<AppState>) -> impl IntoResponse {
    let aggregator = state.aggregator.clone();
    tokio::spawn(async move {
        match aggregator.refresh_cached(Trigger::Manual).await {
            Ok(result) => tracing::info!(
                run_id = %result.run_id,
                total_records = result.total_records,
                "Background refresh done"
            ),
            Err(error) => tracing::error!(error = %error, "Background refresh failed"),
        }
    });

    (StatusCode::ACCEPTED, Json(RefreshReport::accepted()))
}

pub async fn trigger_refresh_sync(
    State(state): State<AppState>,
) -> Result<Json<RefreshReport>, ApiError> {
    // The refresh runs on its own task; giving up here does not cancel it
    let wait = state.aggregator.cache().sync_timeout();
    let result = tokio::time::timeout(wait, state.aggregator.refresh_cached(Trigger::Manual))
        .await
        .map_err(|_| {
            tracing::warn!(timeout_ms = wait.as_millis() as u64, "Synchronous refresh timed out");
            AggregateError::Timeout(wait)
        })??;
    Ok(Json(RefreshReport::from(result.as_ref())))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<u32>,
}

pub async fn list_logs(
    State(state): State<AppState>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    if !(1..=MAX_LOG_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_LOG_LIMIT}"
        )));
    }

    let entries = state
        .aggregator
        .persistence()
        .recent_audits(limit as usize)
        .await?;
    Ok(Json(entries))
}
