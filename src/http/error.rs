//! Error responses.
//!
//! Every failure leaves the service as `{"error": CODE, "detail": message}`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::aggregator::AggregateError;
use crate::cache::CacheError;
use crate::persistence::PersistenceError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Storage(#[from] PersistenceError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid or missing API key")]
    Unauthorized,

    #[error("Too many requests. Limit: {limit} per {window_secs}s")]
    RateLimited {
        limit: u32,
        window_secs: u64,
        retry_after_secs: u64,
    },
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Aggregate(AggregateError::TotalFailure { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::Aggregate(AggregateError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Aggregate(AggregateError::NoSources) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Storage(_) | ApiError::Cache(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Aggregate(AggregateError::TotalFailure { .. }) => "ALL_SOURCES_FAILED",
            ApiError::Aggregate(AggregateError::Timeout(_)) => "AGGREGATION_TIMEOUT",
            ApiError::Aggregate(AggregateError::NoSources) => "NO_SOURCES",
            ApiError::Storage(_) => "STORAGE_UNAVAILABLE",
            ApiError::Cache(_) => "CACHE_UNAVAILABLE",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "INVALID_REQUEST",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
        }

        let body = ErrorBody {
            error: self.code(),
            detail: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();

        if let ApiError::RateLimited {
            retry_after_secs, ..
        } = self
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}
