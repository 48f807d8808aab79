//! Fan-out aggregation over every configured source.
//!
//! # Data Flow
//! ```text
//! refresh(trigger)
//!     → per source, concurrently (bounded by fetch.concurrency_limit):
//!         breaker.try_acquire → fetcher.fetch → permit.record
//!         → persistence.upsert_records (ok only) → persistence.append_audit
//!     → AggregateResult (complete | partial) or TotalFailure
//! ```
//!
//! # Design Decisions
//! - Partial success is success; the failure manifest names what is missing
//! - Persistence problems are logged and never fail a refresh
//! - Reads go through the SWR cache; the scheduler and manual refreshes
//!   share its in-flight dedup

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::aggregator::types::{
    AggregateError, AggregateResult, AggregateStatus, SourceFailure, SourceSummary, Trigger,
};
use crate::cache::{CacheRead, SwrCache, SwrError};
use crate::fetch::{FetchResult, SourceDescriptor, SourceFetcher};
use crate::observability::metrics;
use crate::persistence::{AuditEntry, AuditStatus, Persistence, UpsertSummary};
use crate::resilience::CircuitRegistry;

/// Cache key under which the aggregate lives.
pub const AGGREGATE_CACHE_KEY: &str = "aggregate:v1";

pub type AggregateCache = SwrCache<AggregateResult, AggregateError>;

#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<Inner>,
}

struct Inner {
    sources: Vec<SourceDescriptor>,
    fetcher: Arc<dyn SourceFetcher>,
    circuits: Arc<CircuitRegistry>,
    cache: AggregateCache,
    persistence: Arc<dyn Persistence>,
    fetch_slots: Semaphore,
}

/// What one source contributed to a run.
struct SourceOutcome {
    result: FetchResult,
    upsert: Option<UpsertSummary>,
}

impl Aggregator {
    pub fn new(
        sources: Vec<SourceDescriptor>,
        fetcher: Arc<dyn SourceFetcher>,
        circuits: Arc<CircuitRegistry>,
        cache: AggregateCache,
        persistence: Arc<dyn Persistence>,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sources,
                fetcher,
                circuits,
                cache,
                persistence,
                fetch_slots: Semaphore::new(concurrency_limit.max(1)),
            }),
        }
    }

    pub fn sources(&self) -> &[SourceDescriptor] {
        &self.inner.sources
    }

    pub fn circuits(&self) -> &Arc<CircuitRegistry> {
        &self.inner.circuits
    }

    pub fn cache(&self) -> &AggregateCache {
        &self.inner.cache
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.inner.persistence
    }

    /// Cached aggregate, refreshed on demand as the entry ages.
    pub async fn get_aggregate(&self) -> Result<CacheRead<AggregateResult>, AggregateError> {
        let this = self.clone();
        self.inner
            .cache
            .get_or_refresh(AGGREGATE_CACHE_KEY, move || async move {
                this.refresh(Trigger::OnDemand).await
            })
            .await
            .map_err(|error| match error {
                SwrError::Refresh(error) => error,
                SwrError::Timeout(waited) => AggregateError::Timeout(waited),
            })
    }

    /// Refresh and install into the cache, joining a refresh already running.
    ///
    /// A joined refresh keeps the trigger it was started with, and that is
    /// the trigger its audit entries record.
    pub async fn refresh_cached(&self, trigger: Trigger) -> Result<Arc<AggregateResult>, AggregateError> {
        if self.inner.cache.is_refreshing() {
            tracing::info!(trigger = trigger.as_str(), "Joining refresh already in flight");
        }
        let this = self.clone();
        self.inner
            .cache
            .refresh(AGGREGATE_CACHE_KEY, move || async move { this.refresh(trigger).await })
            .await
    }

    /// One aggregation run across all sources. Does not touch the cache.
    pub async fn refresh(&self, trigger: Trigger) -> Result<AggregateResult, AggregateError> {
        if self.inner.sources.is_empty() {
            return Err(AggregateError::NoSources);
        }

        let run_id = Uuid::new_v4();
        tracing::info!(
            run_id = %run_id,
            trigger = trigger.as_str(),
            sources = self.inner.sources.len(),
            "Refresh started"
        );

        let outcomes = join_all(
            self.inner
                .sources
                .iter()
                .map(|source| self.collect_source(run_id, source, trigger)),
        )
        .await;

        let mut payloads = BTreeMap::new();
        let mut summaries = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        let mut total_records = 0;
        let mut records_changed = 0;

        for (source, SourceOutcome { result, upsert }) in self.inner.sources.iter().zip(outcomes) {
            let changed = upsert.map_or(0, |u| u.changed);
            let status = audit_status(&result);
            let record_count = match result.outcome {
                Ok(records) => {
                    let count = records.len();
                    total_records += count;
                    records_changed += changed;
                    payloads.insert(source.key.clone(), records);
                    count
                }
                Err(error) => {
                    failures.push(SourceFailure {
                        source_key: source.key.clone(),
                        class: error.class(),
                        error: error.to_string(),
                    });
                    0
                }
            };

            summaries.push(SourceSummary {
                source_key: source.key.clone(),
                source_url: source.endpoint.to_string(),
                status,
                record_count,
                records_changed: changed,
                attempts: result.attempts,
                duration_ms: result.duration.as_millis() as u64,
                fetched_at: result.attempted_at,
            });
        }

        if payloads.is_empty() {
            metrics::record_refresh(trigger.as_str(), "total_failure");
            tracing::error!(
                run_id = %run_id,
                failed = failures.len(),
                "Refresh failed for every source"
            );
            return Err(AggregateError::TotalFailure { failures });
        }

        let status = if failures.is_empty() {
            AggregateStatus::Complete
        } else {
            AggregateStatus::Partial
        };
        metrics::record_refresh(
            trigger.as_str(),
            match status {
                AggregateStatus::Complete => "complete",
                AggregateStatus::Partial => "partial",
            },
        );
        tracing::info!(
            run_id = %run_id,
            total_records,
            records_changed,
            failed = failures.len(),
            "Refresh finished"
        );

        Ok(AggregateResult {
            run_id,
            aggregated_at: Utc::now(),
            status,
            total_records,
            records_changed,
            sources: summaries,
            failures,
            payloads,
        })
    }

    async fn collect_source(&self, run_id: Uuid, source: &SourceDescriptor, trigger: Trigger) -> SourceOutcome {
        let result = self.guarded_fetch(source).await;

        let upsert = match &result.outcome {
            Ok(records) => match self
                .inner
                .persistence
                .upsert_records(source, records, result.attempted_at)
                .await
            {
                Ok(summary) => Some(summary),
                Err(error) => {
                    tracing::warn!(source = %source.key, error = %error, "Record upsert failed");
                    None
                }
            },
            Err(_) => None,
        };

        let entry = AuditEntry {
            id: 0,
            run_id,
            source_key: source.key.clone(),
            source_url: source.endpoint.to_string(),
            status: audit_status(&result),
            records_fetched: result.outcome.as_ref().map_or(0, Vec::len),
            records_changed: upsert.map_or(0, |u| u.changed),
            attempts: result.attempts,
            duration_ms: result.duration.as_millis() as u64,
            error_detail: result.outcome.as_ref().err().map(ToString::to_string),
            triggered_by: trigger,
            created_at: Utc::now(),
        };
        if let Err(error) = self.inner.persistence.append_audit(entry).await {
            tracing::warn!(source = %source.key, error = %error, "Audit append failed");
        }

        SourceOutcome { result, upsert }
    }

    async fn guarded_fetch(&self, source: &SourceDescriptor) -> FetchResult {
        // The semaphore is never closed
        let _slot = self.inner.fetch_slots.acquire().await.ok();

        let breaker = self.inner.circuits.get(&source.key);
        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!(source = %source.key, "Circuit open, skipping source");
                return FetchResult::skipped(source);
            }
        };

        let result = self.inner.fetcher.fetch(source).await;
        permit.record(&result.outcome);
        result
    }
}

fn audit_status(result: &FetchResult) -> AuditStatus {
    match &result.outcome {
        Ok(_) => AuditStatus::Ok,
        Err(_) if result.attempts == 0 => AuditStatus::Skipped,
        Err(_) => AuditStatus::Error,
    }
}
