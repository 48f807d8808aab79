//! Request identification and timing.
//!
//! # Responsibilities
//! - Assign an `x-request-id` (UUID v4) unless the client sent one
//! - Echo the request ID on the response
//! - Measure handling time into `X-Response-Time-Ms` and request metrics
//!
//! # Design Decisions
//! - Request ID added as early as possible so every log line can carry it
//! - Timing wraps everything below it, auth and rate limiting included

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tokio::time::Instant;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::observability::metrics;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_RESPONSE_TIME_MS: &str = "x-response-time-ms";

pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

pub async fn response_timing_middleware(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let id = request_id(request.headers()).to_string();

    let mut response = next.run(request).await;

    let elapsed = started.elapsed();
    let status = response.status().as_u16();
    metrics::record_request(method.as_str(), status, elapsed);
    tracing::info!(
        request_id = %id,
        method = %method,
        path = %path,
        status,
        duration_ms = elapsed.as_millis() as u64,
        "Request handled"
    );

    response.headers_mut().insert(
        X_RESPONSE_TIME_MS,
        HeaderValue::from(elapsed.as_millis() as u64),
    );
    response
}
