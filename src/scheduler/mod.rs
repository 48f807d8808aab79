//! Periodic refresh.
//!
//! # Data Flow
//! ```text
//! interval tick
//!     → running flag (compare-and-set; skip if a run is still going)
//!     → Aggregator::refresh_cached(Trigger::Scheduler) on its own task
//!     → flag cleared by drop guard
//! ```
//!
//! Same aggregator, breakers and cache as the HTTP path.

pub mod periodic;

pub use periodic::{RefreshScheduler, TickOutcome};
