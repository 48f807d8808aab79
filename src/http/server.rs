//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with data and admin handlers
//! - Wire up middleware (request ID, tracing, timing, timeout, body limit,
//!   security headers, rate limiting, API-key auth)
//! - Bind server to listener
//! - Run background tasks (scheduler, rate-limit sweeper) alongside it
//! - Drain on shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::setup_admin_router;
use crate::aggregator::Aggregator;
use crate::config::AppConfig;
use crate::http::handlers;
use crate::http::request::{
    propagate_request_id_layer, response_timing_middleware, set_request_id_layer,
};
use crate::lifecycle::{build_components, Components, Shutdown, StartupError};
use crate::scheduler::RefreshScheduler;
use crate::security::{
    api_key_middleware, apply_security_headers, rate_limit_middleware, ApiKeyVerifier,
    FixedWindowLimiter, RateLimitState,
};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Aggregator,
    pub scheduler: Arc<RefreshScheduler>,
    pub started_at: Instant,
}

/// HTTP server for the aggregation API.
pub struct HttpServer {
    router: Router,
    config: AppConfig,
    scheduler: Arc<RefreshScheduler>,
    limiter: Arc<FixedWindowLimiter>,
}

impl HttpServer {
    /// Create a server with production components.
    pub fn new(config: AppConfig) -> Result<Self, StartupError> {
        let components = build_components(&config)?;
        Ok(Self::with_components(config, components))
    }

    pub fn with_components(config: AppConfig, components: Components) -> Self {
        let state = AppState {
            aggregator: components.aggregator,
            scheduler: Arc::clone(&components.scheduler),
            started_at: Instant::now(),
        };
        let rate_limit = RateLimitState::new(&config.rate_limit);
        let limiter = Arc::clone(&rate_limit.limiter);
        let verifier = Arc::new(ApiKeyVerifier::new(&config.auth.api_key));

        let router = build_router(&config, state, rate_limit, verifier);
        Self {
            router,
            config,
            scheduler: components.scheduler,
            limiter,
        }
    }

    /// The fully layered router, for driving in-process.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        tokio::spawn(Arc::clone(&self.scheduler).run(shutdown.subscribe()));

        if self.config.rate_limit.enabled {
            tokio::spawn(sweep_rate_limits(
                Arc::clone(&self.limiter),
                shutdown.subscribe(),
            ));
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(Shutdown::wait(shutdown.subscribe()))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(
    config: &AppConfig,
    state: AppState,
    rate_limit: RateLimitState,
    verifier: Arc<ApiKeyVerifier>,
) -> Router {
    let api = Router::new()
        .route("/aggregate", get(handlers::get_aggregate))
        .route("/records", get(handlers::list_records))
        .route("/records/{id}", get(handlers::get_record))
        .route("/refresh", post(handlers::trigger_refresh))
        .route("/refresh/sync", post(handlers::trigger_refresh_sync))
        .route("/logs", get(handlers::list_logs))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&verifier),
            api_key_middleware,
        ));

    let mut router = Router::new()
        .nest("/api/v1", api)
        .merge(setup_admin_router(verifier))
        .with_state(state);

    if config.rate_limit.enabled {
        router = router.layer(middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ));
    }

    // Outermost first
    let stack = ServiceBuilder::new()
        .layer(set_request_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id_layer());

    apply_security_headers(router, &config.security)
        .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
        .layer(TimeoutLayer::new(config.timeouts.transport()))
        .layer(middleware::from_fn(response_timing_middleware))
        .layer(stack)
}

/// Forget idle clients once per window even when no traffic arrives.
async fn sweep_rate_limits(
    limiter: Arc<FixedWindowLimiter>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(limiter.window());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = limiter.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "Swept stale rate limit windows");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
