//! Admin API (`/admin`).
//!
//! `/admin/health` is open so load balancers can probe it; everything else
//! requires the API key.

pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};

use self::handlers::*;
use crate::http::server::AppState;
use crate::security::{api_key_middleware, ApiKeyVerifier};

pub fn setup_admin_router(verifier: Arc<ApiKeyVerifier>) -> Router<AppState> {
    let protected = Router::new()
        .route("/admin/metrics", get(get_metrics))
        .route("/admin/circuits", get(get_circuits))
        .route("/admin/sources", get(get_sources))
        .route("/admin/cache", delete(clear_cache))
        .route_layer(middleware::from_fn_with_state(verifier, api_key_middleware));

    Router::new()
        .route("/admin/health", get(get_health))
        .merge(protected)
}
