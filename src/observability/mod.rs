//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms via the `metrics` facade)
//!
//! Consumers:
//!     → stdout (pretty for development, JSON for log shippers)
//!     → Prometheus scrape listener (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every HTTP log line
//! - Metric helpers are free functions; with no recorder installed they are no-ops

pub mod logging;
pub mod metrics;
