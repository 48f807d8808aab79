//! Record and audit storage.
//!
//! The aggregator writes through [`Persistence`]; read endpoints page through
//! it. Storage failures are reported as [`PersistenceError`] and never abort a
//! refresh.

pub mod memory;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::fetch::SourceDescriptor;

pub use memory::{checksum, MemoryRepository};
pub use types::{
    AuditEntry, AuditStatus, PersistenceError, RecordPage, SourceStats, StoredRecord, UpsertSummary,
};

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Reconcile the stored records of `source` with `records`.
    async fn upsert_records(
        &self,
        source: &SourceDescriptor,
        records: &[serde_json::Value],
        fetched_at: DateTime<Utc>,
    ) -> Result<UpsertSummary, PersistenceError>;

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), PersistenceError>;

    /// Page through records, newest fetch first. `page` is 1-based.
    async fn paginate_records(
        &self,
        source_key: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<RecordPage, PersistenceError>;

    async fn get_record(&self, id: u64) -> Result<Option<StoredRecord>, PersistenceError>;

    /// Most recent audit entries, newest first.
    async fn recent_audits(&self, limit: usize) -> Result<Vec<AuditEntry>, PersistenceError>;

    async fn source_stats(&self) -> Result<Vec<SourceStats>, PersistenceError>;

    async fn ping(&self) -> Result<(), PersistenceError>;
}
