//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! optional config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (AGGREGATOR_* environment overrides)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::AppConfig;
pub use schema::{
    AuthConfig, CacheConfig, CircuitBreakerConfig, FetchConfig, ListenerConfig,
    ObservabilityConfig, PersistenceConfig, RateLimitConfig, RetryConfig, SchedulerConfig,
    SecurityConfig, SourceConfig, TimeoutConfig,
};
