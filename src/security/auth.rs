//! API key authentication.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};

use crate::http::error::ApiError;

pub const X_API_KEY: &str = "x-api-key";

/// Holds only the digest of the configured key.
pub struct ApiKeyVerifier {
    digest: [u8; 32],
}

impl ApiKeyVerifier {
    pub fn new(api_key: &str) -> Self {
        Self {
            digest: Sha256::digest(api_key.as_bytes()).into(),
        }
    }

    /// Compare digests without short-circuiting, so timing does not depend
    /// on how much of the candidate matches.
    pub fn verify(&self, candidate: &str) -> bool {
        let candidate = Sha256::digest(candidate.as_bytes());
        self.digest
            .iter()
            .zip(candidate.iter())
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
    }
}

/// Key from `X-API-Key`, else from `Authorization: Bearer`.
pub fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get(X_API_KEY).and_then(|v| v.to_str().ok()) {
        return Some(key);
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

pub async fn api_key_middleware(
    State(verifier): State<Arc<ApiKeyVerifier>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = extract_api_key(request.headers());
    let key_present = presented.is_some();
    if presented.is_some_and(|key| verifier.verify(key)) {
        return Ok(next.run(request).await);
    }

    tracing::warn!(
        path = %request.uri().path(),
        key_present,
        "Rejected unauthenticated request"
    );
    Err(ApiError::Unauthorized)
}
