//! Metrics collection and exposition.
//!
//! # Metrics
//! - `aggregator_http_requests_total` (counter): requests by method, status
//! - `aggregator_http_request_duration_seconds` (histogram)
//! - `aggregator_cache_reads_total` (counter): reads by `HIT|STALE|MISS`
//! - `aggregator_cache_revalidations_total` (counter): by outcome
//! - `aggregator_fetch_attempts_total` (counter): per source
//! - `aggregator_fetch_total` (counter): per source and outcome
//! - `aggregator_fetch_duration_seconds` (histogram): per source
//! - `aggregator_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `aggregator_rate_limited_total` (counter)
//! - `aggregator_refresh_total` (counter): by trigger and outcome
//! - `aggregator_scheduler_ticks_total` (counter): by outcome

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with its own scrape listener.
///
/// Must run inside the Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics listener started");
    Ok(())
}

pub fn record_request(method: &str, status: u16, elapsed: Duration) {
    counter!(
        "aggregator_http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "aggregator_http_request_duration_seconds",
        "method" => method.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_cache_read(status: &'static str) {
    counter!("aggregator_cache_reads_total", "status" => status).increment(1);
}

pub fn record_revalidation(outcome: &'static str) {
    counter!("aggregator_cache_revalidations_total", "outcome" => outcome).increment(1);
}

pub fn record_fetch_attempt(source: &str) {
    counter!("aggregator_fetch_attempts_total", "source" => source.to_string()).increment(1);
}

pub fn record_fetch(source: &str, outcome: &'static str, elapsed: Duration) {
    counter!(
        "aggregator_fetch_total",
        "source" => source.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("aggregator_fetch_duration_seconds", "source" => source.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_circuit_state(source: &str, level: f64) {
    gauge!("aggregator_circuit_state", "source" => source.to_string()).set(level);
}

pub fn record_rate_limited() {
    counter!("aggregator_rate_limited_total").increment(1);
}

pub fn record_refresh(trigger: &'static str, outcome: &'static str) {
    counter!(
        "aggregator_refresh_total",
        "trigger" => trigger,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_scheduler_tick(outcome: &'static str) {
    counter!("aggregator_scheduler_ticks_total", "outcome" => outcome).increment(1);
}
