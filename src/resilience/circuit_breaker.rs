//! Per-source circuit breaker.
//!
//! # States
//! - Closed: calls pass through
//! - Open: source assumed down, calls fail fast with `CircuitOpen`
//! - Half-Open: a single trial call probes whether the source recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures reaches failure_threshold
//! Open → Half-Open: first call after cooldown since opened_at (becomes the trial)
//! Half-Open → Closed: trial succeeds
//! Half-Open → Open: trial fails (cooldown restarts)
//! ```
//!
//! # Design Decisions
//! - State is an immutable snapshot behind `ArcSwap`; every transition is a
//!   compare-and-swap, so readers never block and no lock is held across I/O
//! - Callers hold a [`CallPermit`] for the duration of the call; dropping a
//!   trial permit without an outcome frees the trial slot
//! - Non-trial outcomes that land after the circuit left Closed are ignored

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::fetch::FetchError;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn gauge_level(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

/// Immutable breaker state. Replaced wholesale on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub half_open_trial_in_flight: bool,
}

impl CircuitSnapshot {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_trial_in_flight: false,
        }
    }

    fn opened(consecutive_failures: u32, now: Instant) -> Self {
        Self {
            state: CircuitState::Open,
            consecutive_failures,
            opened_at: Some(now),
            half_open_trial_in_flight: false,
        }
    }
}

/// Breaker settings, derived from config.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown(),
        }
    }
}

/// Serializable view for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitView {
    pub source: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Seconds until an open circuit admits a trial.
    pub retry_after_secs: Option<u64>,
}

pub struct CircuitBreaker {
    key: String,
    settings: BreakerSettings,
    state: ArcSwap<CircuitSnapshot>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("key", &self.key)
            .field("state", &self.state.load().state)
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            key: key.into(),
            settings,
            state: ArcSwap::from_pointee(CircuitSnapshot::closed()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot::clone(&self.state.load())
    }

    pub fn state(&self) -> CircuitState {
        self.state.load().state
    }

    pub fn view(&self) -> CircuitView {
        let snapshot = self.snapshot();
        let retry_after_secs = match (snapshot.state, snapshot.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                let ready_at = opened_at + self.settings.cooldown;
                Some(ready_at.saturating_duration_since(Instant::now()).as_secs())
            }
            _ => None,
        };
        CircuitView {
            source: self.key.clone(),
            state: snapshot.state,
            consecutive_failures: snapshot.consecutive_failures,
            retry_after_secs,
        }
    }

    /// Ask to make a call. Rejected with [`FetchError::CircuitOpen`] while
    /// open or while another half-open trial is running.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CallPermit, FetchError> {
        let cooldown = self.settings.cooldown;
        let admitted = self.transition(|current, now| match current.state {
            CircuitState::Closed => (None, Some(false)),
            CircuitState::Open => {
                let cooled = current
                    .opened_at
                    .map_or(true, |opened_at| now.saturating_duration_since(opened_at) >= cooldown);
                if cooled {
                    let next = CircuitSnapshot {
                        state: CircuitState::HalfOpen,
                        half_open_trial_in_flight: true,
                        ..current.clone()
                    };
                    (Some(next), Some(true))
                } else {
                    (None, None)
                }
            }
            CircuitState::HalfOpen if current.half_open_trial_in_flight => (None, None),
            CircuitState::HalfOpen => {
                let next = CircuitSnapshot {
                    half_open_trial_in_flight: true,
                    ..current.clone()
                };
                (Some(next), Some(true))
            }
        });

        match admitted {
            Some(trial) => Ok(CallPermit {
                breaker: Arc::clone(self),
                trial,
                settled: false,
            }),
            None => Err(FetchError::CircuitOpen),
        }
    }

    fn on_success(&self, trial: bool) {
        self.transition(|current, _| {
            let next = match current.state {
                CircuitState::Closed if current.consecutive_failures > 0 => Some(CircuitSnapshot::closed()),
                CircuitState::HalfOpen if trial => Some(CircuitSnapshot::closed()),
                _ => None,
            };
            (next, ())
        });
    }

    fn on_failure(&self, trial: bool) {
        let threshold = self.settings.failure_threshold;
        self.transition(|current, now| {
            let failures = current.consecutive_failures.saturating_add(1);
            let next = match current.state {
                CircuitState::Closed if failures >= threshold => Some(CircuitSnapshot::opened(failures, now)),
                CircuitState::Closed => Some(CircuitSnapshot {
                    consecutive_failures: failures,
                    ..current.clone()
                }),
                CircuitState::HalfOpen if trial => Some(CircuitSnapshot::opened(failures, now)),
                _ => None,
            };
            (next, ())
        });
    }

    fn release_trial(&self) {
        self.transition(|current, _| {
            let next = (current.state == CircuitState::HalfOpen && current.half_open_trial_in_flight)
                .then(|| CircuitSnapshot {
                    half_open_trial_in_flight: false,
                    ..current.clone()
                });
            (next, ())
        });
    }

    /// Compare-and-swap loop. `decide` returns the replacement snapshot (or
    /// `None` to leave state alone) plus a value for the caller.
    fn transition<R>(&self, mut decide: impl FnMut(&CircuitSnapshot, Instant) -> (Option<CircuitSnapshot>, R)) -> R {
        loop {
            let current = self.state.load_full();
            let (next, out) = decide(&current, Instant::now());
            let Some(next) = next else {
                return out;
            };

            let from = current.state;
            let to = next.state;
            let previous = self.state.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*previous, &current) {
                if from != to {
                    self.log_transition(from, to);
                }
                return out;
            }
        }
    }

    fn log_transition(&self, from: CircuitState, to: CircuitState) {
        metrics::record_circuit_state(&self.key, to.gauge_level());
        match to {
            CircuitState::Open => tracing::warn!(
                source = %self.key,
                from = ?from,
                cooldown_secs = self.settings.cooldown.as_secs(),
                "Circuit opened"
            ),
            CircuitState::HalfOpen => tracing::info!(source = %self.key, "Circuit half-open, admitting trial"),
            CircuitState::Closed => tracing::info!(source = %self.key, from = ?from, "Circuit closed"),
        }
    }
}

/// Admission to call the guarded source. Report the outcome with
/// [`CallPermit::success`] or [`CallPermit::failure`].
#[must_use = "report the call outcome through the permit"]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl CallPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }

    pub fn record<T, E>(self, outcome: &Result<T, E>) {
        match outcome {
            Ok(_) => self.success(),
            Err(_) => self.failure(),
        }
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

/// One breaker per source key, created lazily and shared.
#[derive(Debug)]
pub struct CircuitRegistry {
    settings: BreakerSettings,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitRegistry {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            settings: BreakerSettings::from(config),
            breakers: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(key) {
            return Arc::clone(existing.value());
        }
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.settings)))
            .value()
            .clone()
    }

    /// Views of every known breaker, ordered by source key.
    pub fn snapshot_all(&self) -> Vec<CircuitView> {
        let mut views: Vec<_> = self.breakers.iter().map(|entry| entry.value().view()).collect();
        views.sort_by(|a, b| a.source.cmp(&b.source));
        views
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_secs: u64) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "posts",
            BreakerSettings {
                failure_threshold: threshold,
                cooldown: Duration::from_secs(cooldown_secs),
            },
        ))
    }

    fn fail(cb: &Arc<CircuitBreaker>, times: u32) {
        for _ in 0..times {
            cb.try_acquire().unwrap().failure();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_exactly_at_threshold() {
        let cb = breaker(3, 60);

        fail(&cb, 2);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 2);

        fail(&cb, 1);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.snapshot().opened_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let cb = breaker(3, 60);
        fail(&cb, 2);
        cb.try_acquire().unwrap().success();
        fail(&cb, 2);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_until_cooldown_then_single_trial() {
        let cb = breaker(1, 60);
        fail(&cb, 1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(matches!(cb.try_acquire(), Err(FetchError::CircuitOpen)));

        tokio::time::advance(Duration::from_secs(1)).await;
        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Concurrent callers are turned away while the trial runs
        assert!(matches!(cb.try_acquire(), Err(FetchError::CircuitOpen)));
        trial.success();
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_success_closes() {
        let cb = breaker(2, 10);
        fail(&cb, 2);
        tokio::time::advance(Duration::from_secs(10)).await;

        cb.try_acquire().unwrap().success();
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(!snapshot.half_open_trial_in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_failure_reopens_with_fresh_cooldown() {
        let cb = breaker(1, 10);
        fail(&cb, 1);
        let first_opened = cb.snapshot().opened_at.unwrap();

        tokio::time::advance(Duration::from_secs(15)).await;
        cb.try_acquire().unwrap().failure();

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert!(snapshot.opened_at.unwrap() > first_opened);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.try_acquire().is_err());
        assert_eq!(cb.view().retry_after_secs, Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_releases_slot() {
        let cb = breaker(1, 1);
        fail(&cb, 1);
        tokio::time::advance(Duration::from_secs(1)).await;

        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.snapshot().half_open_trial_in_flight);

        let next = cb.try_acquire().unwrap();
        assert!(next.is_trial());
        next.success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_registry_shares_breakers_per_key() {
        let registry = CircuitRegistry::new(&CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown_secs: 60,
        });
        registry.get("users").try_acquire().unwrap().failure();

        assert_eq!(registry.get("users").state(), CircuitState::Open);
        assert_eq!(registry.get("posts").state(), CircuitState::Closed);

        let views = registry.snapshot_all();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].source, "posts");
        assert_eq!(views[1].state, CircuitState::Open);
    }
}
