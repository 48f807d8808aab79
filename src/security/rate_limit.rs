//! Fixed-window rate limiting per client address.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::http::error::ApiError;
use crate::observability::metrics;
use crate::security::client_ip::ClientIdentityResolver;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Outcome of one `allow` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub permitted: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

impl RateDecision {
    /// Whole seconds until the window resets, rounded up.
    pub fn reset_after_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset_after_secs()));
    }
}

struct RateWindow {
    started_at: Instant,
    count: u32,
}

pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    windows: DashMap<IpAddr, RateWindow>,
    last_sweep: Mutex<Instant>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests, config.window())
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count one request for `identity`. Increment and comparison happen
    /// under the map entry lock.
    pub fn allow(&self, identity: IpAddr) -> RateDecision {
        let now = Instant::now();
        let decision = {
            let mut slot = self.windows.entry(identity).or_insert(RateWindow {
                started_at: now,
                count: 0,
            });
            if now.duration_since(slot.started_at) >= self.window {
                slot.started_at = now;
                slot.count = 0;
            }

            let reset_after = (slot.started_at + self.window).saturating_duration_since(now);
            if slot.count < self.limit {
                slot.count += 1;
                RateDecision {
                    permitted: true,
                    limit: self.limit,
                    remaining: self.limit - slot.count,
                    reset_after,
                }
            } else {
                RateDecision {
                    permitted: false,
                    limit: self.limit,
                    remaining: 0,
                    reset_after,
                }
            }
        };

        self.maybe_sweep(now);
        decision
    }

    /// Drop windows that ended more than one window ago. Returns how many
    /// identities were forgotten.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let horizon = self.window * 2;
        let before = self.windows.len();
        self.windows
            .retain(|_, slot| now.duration_since(slot.started_at) < horizon);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    fn maybe_sweep(&self, now: Instant) {
        // Contended callers skip; someone else is already sweeping.
        let Ok(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if now.duration_since(*last) < self.window {
            return;
        }
        *last = now;
        drop(last);

        let removed = self.sweep();
        if removed > 0 {
            tracing::debug!(removed, "Swept stale rate limit windows");
        }
    }
}

/// State for [`rate_limit_middleware`].
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<FixedWindowLimiter>,
    pub resolver: Arc<ClientIdentityResolver>,
}

impl RateLimitState {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            limiter: Arc::new(FixedWindowLimiter::from_config(config)),
            resolver: Arc::new(ClientIdentityResolver::new(config)),
        }
    }
}

pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let client = state.resolver.resolve(peer, request.headers());

    let decision = state.limiter.allow(client);
    if !decision.permitted {
        metrics::record_rate_limited();
        tracing::warn!(
            client = %client,
            path = %request.uri().path(),
            limit = decision.limit,
            "Rate limit exceeded"
        );
        let mut response = ApiError::RateLimited {
            limit: decision.limit,
            window_secs: state.limiter.window().as_secs(),
            retry_after_secs: decision.reset_after_secs(),
        }
        .into_response();
        decision.apply_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    decision.apply_headers(response.headers_mut());
    response
}
