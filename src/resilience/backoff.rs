//! Exponential backoff with jitter.
//!
//! `base_delay * 2^(attempt-1)`, capped at `max_delay`, plus up to 10% jitter.

use std::time::Duration;

use crate::config::RetryConfig;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

/// Decide whether attempt number `attempt` (1-based, already made) should be
/// followed by another, and after how long.
///
/// `jitter` is a sample in `[0, 1)`; it scales a bonus of up to 10% of the
/// capped delay. Keeping it a parameter makes the decision deterministic.
pub fn retry_decision(attempt: u32, config: &RetryConfig, jitter: f64) -> RetryDecision {
    if attempt == 0 || attempt >= config.max_attempts {
        return RetryDecision::GiveUp;
    }

    let capped = exponential_delay_ms(attempt, config.base_delay_ms, config.max_delay_ms);
    let jitter_ms = ((capped / 10) as f64 * jitter.clamp(0.0, 1.0)) as u64;

    RetryDecision::Retry {
        delay: Duration::from_millis(capped + jitter_ms),
    }
}

fn exponential_delay_ms(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    let exponential_base = 2u64.saturating_pow(attempt.saturating_sub(1));
    base_ms.saturating_mul(exponential_base).min(max_ms)
}
