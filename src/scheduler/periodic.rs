//! Fixed-interval refresh loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::aggregator::{Aggregator, Trigger};
use crate::config::SchedulerConfig;
use crate::observability::metrics;

pub struct RefreshScheduler {
    aggregator: Aggregator,
    interval: Duration,
    enabled: bool,
    running: Arc<AtomicBool>,
}

/// Result of one tick.
#[derive(Debug)]
pub enum TickOutcome {
    Started(JoinHandle<()>),
    /// The previous run had not finished.
    Skipped,
}

impl RefreshScheduler {
    pub fn new(aggregator: Aggregator, config: &SchedulerConfig) -> Self {
        Self {
            aggregator,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            enabled: config.enabled,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a scheduled refresh is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start a refresh unless one from a previous tick is still running.
    pub fn tick(&self) -> TickOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            metrics::record_scheduler_tick("skipped");
            tracing::warn!("Previous scheduled refresh still running, skipping tick");
            return TickOutcome::Skipped;
        }

        metrics::record_scheduler_tick("started");
        let guard = RunningGuard(Arc::clone(&self.running));
        let aggregator = self.aggregator.clone();

        TickOutcome::Started(tokio::spawn(async move {
            let _guard = guard;
            match aggregator.refresh_cached(Trigger::Scheduler).await {
                Ok(result) => tracing::info!(
                    run_id = %result.run_id,
                    total_records = result.total_records,
                    records_changed = result.records_changed,
                    "Scheduled refresh done"
                ),
                Err(error) => tracing::error!(error = %error, "Scheduled refresh failed"),
            }
        }))
    }

    /// Tick every interval until shutdown. The first tick fires one interval
    /// after start.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.enabled {
            tracing::info!("Scheduler disabled");
            return;
        }

        tracing::info!(interval_secs = self.interval.as_secs(), "Scheduler starting");

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => match self.tick() {
                    TickOutcome::Started(handle) => drop(handle),
                    TickOutcome::Skipped => {}
                },
                _ = shutdown.recv() => {
                    tracing::info!("Scheduler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// Clears the running flag when the refresh task ends, panics included.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
