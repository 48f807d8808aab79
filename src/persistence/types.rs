//! Stored records and audit entries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::aggregator::Trigger;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A record as last seen upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: u64,
    pub source_key: String,
    pub source_url: String,
    /// The upstream integer `id`, when the record carried one.
    pub external_id: Option<i64>,
    pub payload: serde_json::Value,
    /// Hex SHA-256 of the canonical JSON payload.
    pub checksum: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub fetched: usize,
    /// Inserted or rewritten because the checksum moved.
    pub changed: usize,
    /// Dropped because they vanished upstream.
    pub removed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordPage {
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
    pub items: Vec<StoredRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Ok,
    Error,
    Skipped,
}

/// One source's share of one refresh run.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// Assigned by the store on append.
    pub id: u64,
    pub run_id: Uuid,
    pub source_key: String,
    pub source_url: String,
    pub status: AuditStatus,
    pub records_fetched: usize,
    pub records_changed: usize,
    pub attempts: u32,
    pub duration_ms: u64,
    pub error_detail: Option<String>,
    pub triggered_by: Trigger,
    pub created_at: DateTime<Utc>,
}

/// Per-source totals for the admin listing.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub source_key: String,
    pub record_count: usize,
    pub last_fetch: Option<DateTime<Utc>>,
}
