//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the aggregator.
//! All types derive Serde traits for deserialization from config files; every
//! section has defaults so an empty file (or none at all) is a valid starting
//! point for environment overrides.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Root configuration for the aggregation service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream data sources.
    pub sources: Vec<SourceConfig>,

    /// Stale-while-revalidate cache settings.
    pub cache: CacheConfig,

    /// Per-source circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Outbound fetch settings.
    pub fetch: FetchConfig,

    /// Retry configuration for outbound fetches.
    pub retries: RetryConfig,

    /// Inbound rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Periodic refresh.
    pub scheduler: SchedulerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// API key authentication.
    pub auth: AuthConfig,

    /// Record store and audit log.
    pub persistence: PersistenceConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// A single upstream source.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SourceConfig {
    /// Unique source key. Derived from the last URL path segment when absent.
    #[serde(default)]
    pub key: Option<String>,

    /// Endpoint returning JSON.
    pub url: String,

    /// Per-attempt timeout override in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl SourceConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            key: None,
            url: url.into(),
            timeout_ms: None,
        }
    }
}

fn default_sources() -> Vec<SourceConfig> {
    [
        "https://jsonplaceholder.typicode.com/posts",
        "https://jsonplaceholder.typicode.com/users",
        "https://jsonplaceholder.typicode.com/todos",
        "https://jsonplaceholder.typicode.com/comments",
    ]
    .into_iter()
    .map(SourceConfig::from_url)
    .collect()
}

/// Stale-while-revalidate cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a freshly aggregated value is served without revalidation.
    pub fresh_ttl_secs: u64,

    /// Extra window after freshness expiry during which the old value is
    /// still served while a background refresh runs.
    pub stale_grace_secs: u64,

    /// Maximum concurrent background revalidations.
    pub max_background_refreshes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fresh_ttl_secs: 300,
            stale_grace_secs: 60,
            max_background_refreshes: 4,
        }
    }
}

impl CacheConfig {
    pub fn fresh_ttl(&self) -> Duration {
        Duration::from_secs(self.fresh_ttl_secs)
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_secs(self.stale_grace_secs)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Seconds an open circuit rejects calls before allowing a trial.
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 60,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Outbound fetch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Default per-attempt timeout in milliseconds.
    pub timeout_ms: u64,

    /// Overall deadline for one logical fetch, retries included.
    pub deadline_ms: u64,

    /// Maximum sources fetched concurrently during one refresh.
    pub concurrency_limit: usize,

    /// User-Agent sent upstream.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 8_000,
            deadline_ms: 30_000,
            concurrency_limit: 10,
            user_agent: concat!("realtime-aggregator/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 8_000,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests allowed per identity per window.
    pub requests: u32,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Peers whose forwarding headers are trusted.
    pub trusted_proxies: Vec<IpAddr>,

    /// Headers consulted, in order, for the client address behind a trusted proxy.
    pub proxy_headers: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests: 100,
            window_secs: 60,
            trusted_proxies: Vec::new(),
            proxy_headers: vec!["X-Forwarded-For".to_string(), "X-Real-IP".to_string()],
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 600,
        }
    }
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    /// Synchronous cache-miss refreshes inherit this deadline.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    /// Outer bound on the whole exchange. Longer than `request()` so that
    /// handlers answer their own timeouts with a JSON 504 first.
    pub fn transport(&self) -> Duration {
        self.request() + TRANSPORT_GRACE
    }
}

const TRANSPORT_GRACE: Duration = Duration::from_secs(1);

/// API key authentication.
#[derive(Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared API key. Required; there is no default.
    pub api_key: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Record store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Audit entries kept in memory; oldest are dropped first.
    pub audit_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            audit_capacity: 10_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable security headers.
    pub enable_headers: bool,
    /// Send Strict-Transport-Security (only behind TLS termination).
    pub hsts: bool,
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            hsts: false,
            max_body_size: 64 * 1024,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            sources: default_sources(),
            cache: CacheConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            fetch: FetchConfig::default(),
            retries: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            scheduler: SchedulerConfig::default(),
            timeouts: TimeoutConfig::default(),
            auth: AuthConfig::default(),
            persistence: PersistenceConfig::default(),
            observability: ObservabilityConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}
