//! Real-time aggregation service library.
//!
//! Fans out to configured JSON sources, merges them into one aggregate and
//! serves it through a stale-while-revalidate cache, with per-source circuit
//! breakers, retrying fetches, rate limiting and a periodic refresh.

// Core subsystems
pub mod aggregator;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod http;
pub mod persistence;
pub mod scheduler;

// Operator surface
pub mod admin;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
