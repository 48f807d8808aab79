//! Aggregation results and errors.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fetch::{ErrorClass, Records};
use crate::persistence::AuditStatus;

/// What started a refresh run. Recorded on every audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Scheduler,
    OnDemand,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Manual => "manual",
            Trigger::Scheduler => "scheduler",
            Trigger::OnDemand => "on_demand",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    Complete,
    Partial,
}

/// Per-source line of an aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub source_key: String,
    pub source_url: String,
    pub status: AuditStatus,
    pub record_count: usize,
    pub records_changed: usize,
    pub attempts: u32,
    pub duration_ms: u64,
    pub fetched_at: DateTime<Utc>,
}

/// Failure manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub source_key: String,
    pub class: ErrorClass,
    pub error: String,
}

/// One aggregation run. Partial success is still a result.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateResult {
    pub run_id: Uuid,
    pub aggregated_at: DateTime<Utc>,
    pub status: AggregateStatus,
    pub total_records: usize,
    pub records_changed: usize,
    pub sources: Vec<SourceSummary>,
    pub failures: Vec<SourceFailure>,
    pub payloads: BTreeMap<String, Records>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AggregateError {
    #[error("all {} sources failed", failures.len())]
    TotalFailure { failures: Vec<SourceFailure> },

    #[error("no sources configured")]
    NoSources,

    #[error("aggregation did not finish within {}ms", .0.as_millis())]
    Timeout(Duration),
}

/// Response body of a manual refresh.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub message: String,
    pub run_id: Option<Uuid>,
    pub status: Option<AggregateStatus>,
    pub sources_refreshed: usize,
    pub records_upserted: usize,
    pub records_changed: usize,
    pub errors: Vec<String>,
}

impl RefreshReport {
    pub fn accepted() -> Self {
        Self {
            message: "Refresh triggered in background".to_string(),
            run_id: None,
            status: None,
            sources_refreshed: 0,
            records_upserted: 0,
            records_changed: 0,
            errors: Vec::new(),
        }
    }
}

impl From<&AggregateResult> for RefreshReport {
    fn from(result: &AggregateResult) -> Self {
        Self {
            message: "Refresh complete".to_string(),
            run_id: Some(result.run_id),
            status: Some(result.status),
            sources_refreshed: result.payloads.len(),
            records_upserted: result.total_records,
            records_changed: result.records_changed,
            errors: result
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.source_key, f.error))
                .collect(),
        }
    }
}
