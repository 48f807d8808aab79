//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Fetch of one source:
//!     → circuit_breaker.rs (reject fast while the source is unhealthy)
//!     → timeouts.rs (per-attempt timeout clamped to the call deadline)
//!     → On failure: retries.rs (retryable?) + backoff.rs (how long to wait)
//!     → circuit_breaker.rs (record the final outcome)
//! ```
//!
//! # Design Decisions
//! - Every outbound call has a deadline
//! - Retry decisions are pure functions so they can be tested without I/O
//! - One breaker per source, never global

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::{retry_decision, RetryDecision};
pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitRegistry, CircuitSnapshot, CircuitState};
