//! Deadline arithmetic for outbound calls.
//!
//! Uses `tokio::time::Instant` so paused-clock tests see the same deadlines
//! the fetcher does.

use std::time::Duration;
use tokio::time::Instant;

/// Time left until `deadline`, or `None` once it has passed.
pub fn remaining(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
}

/// Per-attempt timeout: the source timeout clamped to the remaining budget.
pub fn attempt_timeout(source_timeout: Duration, deadline: Instant) -> Option<Duration> {
    remaining(deadline).map(|left| left.min(source_timeout))
}

/// Whether sleeping `delay` would leave no time for another attempt.
pub fn crosses_deadline(delay: Duration, deadline: Instant) -> bool {
    match remaining(deadline) {
        Some(left) => delay >= left,
        None => true,
    }
}
