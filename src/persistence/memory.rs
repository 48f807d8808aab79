//! In-memory persistence.
//!
//! Records are keyed by `(source_key, identity)` where identity is the
//! upstream integer `id`, or the payload checksum for records without one.
//! The audit log is a bounded ring; the oldest entries fall off first.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::fetch::SourceDescriptor;
use crate::persistence::types::{
    AuditEntry, PersistenceError, RecordPage, SourceStats, StoredRecord, UpsertSummary,
};
use crate::persistence::Persistence;

/// Hex SHA-256 of a payload's canonical JSON (object keys sorted).
pub fn checksum(payload: &Value) -> String {
    hex::encode(Sha256::digest(payload.to_string().as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RecordIdentity {
    External(i64),
    Checksum(String),
}

#[derive(Default)]
struct RecordTable {
    rows: BTreeMap<u64, StoredRecord>,
    by_source: HashMap<String, HashMap<RecordIdentity, u64>>,
    next_id: u64,
}

struct AuditLog {
    entries: VecDeque<AuditEntry>,
    capacity: usize,
    next_id: u64,
}

pub struct MemoryRepository {
    records: RwLock<RecordTable>,
    audits: Mutex<AuditLog>,
}

impl MemoryRepository {
    pub fn new(audit_capacity: usize) -> Self {
        let capacity = audit_capacity.max(1);
        Self {
            records: RwLock::new(RecordTable::default()),
            audits: Mutex::new(AuditLog {
                entries: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                next_id: 0,
            }),
        }
    }
}

fn poisoned<T>(_: T) -> PersistenceError {
    PersistenceError::Unavailable("store lock poisoned".to_string())
}

#[async_trait]
impl Persistence for MemoryRepository {
    async fn upsert_records(
        &self,
        source: &SourceDescriptor,
        records: &[Value],
        fetched_at: DateTime<Utc>,
    ) -> Result<UpsertSummary, PersistenceError> {
        let mut guard = self.records.write().map_err(poisoned)?;
        let RecordTable {
            rows,
            by_source,
            next_id,
        } = &mut *guard;

        let known = by_source.entry(source.key.clone()).or_default();
        let mut seen = HashSet::with_capacity(records.len());
        let mut summary = UpsertSummary {
            fetched: records.len(),
            ..UpsertSummary::default()
        };

        for payload in records {
            let digest = checksum(payload);
            let external_id = payload.get("id").and_then(Value::as_i64);
            let identity = match external_id {
                Some(id) => RecordIdentity::External(id),
                None => RecordIdentity::Checksum(digest.clone()),
            };
            seen.insert(identity.clone());

            if let Some(row) = known.get(&identity).and_then(|id| rows.get_mut(id)) {
                row.fetched_at = fetched_at;
                if row.checksum != digest {
                    row.payload = payload.clone();
                    row.checksum = digest;
                    summary.changed += 1;
                }
                continue;
            }

            *next_id += 1;
            rows.insert(
                *next_id,
                StoredRecord {
                    id: *next_id,
                    source_key: source.key.clone(),
                    source_url: source.endpoint.to_string(),
                    external_id,
                    payload: payload.clone(),
                    checksum: digest,
                    fetched_at,
                },
            );
            known.insert(identity, *next_id);
            summary.changed += 1;
        }

        known.retain(|identity, id| {
            if seen.contains(identity) {
                return true;
            }
            rows.remove(id);
            summary.removed += 1;
            false
        });

        Ok(summary)
    }

    async fn append_audit(&self, mut entry: AuditEntry) -> Result<(), PersistenceError> {
        let mut log = self.audits.lock().map_err(poisoned)?;
        log.next_id += 1;
        entry.id = log.next_id;
        if log.entries.len() == log.capacity {
            log.entries.pop_front();
        }
        log.entries.push_back(entry);
        Ok(())
    }

    async fn paginate_records(
        &self,
        source_key: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<RecordPage, PersistenceError> {
        let table = self.records.read().map_err(poisoned)?;
        let mut matching: Vec<&StoredRecord> = table
            .rows
            .values()
            .filter(|row| source_key.map_or(true, |key| row.source_key == key))
            .collect();
        matching.sort_by(|a, b| b.fetched_at.cmp(&a.fetched_at).then(b.id.cmp(&a.id)));

        let offset = page.saturating_sub(1) as usize * page_size as usize;
        Ok(RecordPage {
            total: matching.len(),
            page,
            page_size,
            items: matching
                .into_iter()
                .skip(offset)
                .take(page_size as usize)
                .cloned()
                .collect(),
        })
    }

    async fn get_record(&self, id: u64) -> Result<Option<StoredRecord>, PersistenceError> {
        let table = self.records.read().map_err(poisoned)?;
        Ok(table.rows.get(&id).cloned())
    }

    async fn recent_audits(&self, limit: usize) -> Result<Vec<AuditEntry>, PersistenceError> {
        let log = self.audits.lock().map_err(poisoned)?;
        Ok(log.entries.iter().rev().take(limit).cloned().collect())
    }

    async fn source_stats(&self) -> Result<Vec<SourceStats>, PersistenceError> {
        let table = self.records.read().map_err(poisoned)?;
        let mut stats: BTreeMap<&str, SourceStats> = BTreeMap::new();
        for row in table.rows.values() {
            let entry = stats.entry(row.source_key.as_str()).or_insert_with(|| SourceStats {
                source_key: row.source_key.clone(),
                record_count: 0,
                last_fetch: None,
            });
            entry.record_count += 1;
            entry.last_fetch = entry.last_fetch.max(Some(row.fetched_at));
        }
        Ok(stats.into_values().collect())
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        self.records.read().map(|_| ()).map_err(poisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Trigger;
    use crate::persistence::AuditStatus;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    fn source(key: &str) -> SourceDescriptor {
        SourceDescriptor {
            key: key.to_string(),
            endpoint: format!("http://upstream.test/{key}").parse().unwrap(),
            timeout: Duration::from_secs(1),
        }
    }

    fn audit(source_key: &str) -> AuditEntry {
        AuditEntry {
            id: 0,
            run_id: Uuid::new_v4(),
            source_key: source_key.to_string(),
            source_url: format!("http://upstream.test/{source_key}"),
            status: AuditStatus::Ok,
            records_fetched: 1,
            records_changed: 1,
            attempts: 1,
            duration_ms: 5,
            error_detail: None,
            triggered_by: Trigger::Manual,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_checksum_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"id":1,"title":"x"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"title":"x","id":1}"#).unwrap();
        assert_eq!(checksum(&a), checksum(&b));
        assert_eq!(checksum(&a).len(), 64);
    }

    #[tokio::test]
    async fn test_upsert_counts_only_changes() {
        let repo = MemoryRepository::new(10);
        let posts = source("posts");
        let now = Utc::now();

        let first = repo
            .upsert_records(&posts, &[json!({"id": 1, "t": "a"}), json!({"id": 2, "t": "b"})], now)
            .await
            .unwrap();
        assert_eq!(first, UpsertSummary { fetched: 2, changed: 2, removed: 0 });

        let second = repo
            .upsert_records(&posts, &[json!({"id": 1, "t": "a"}), json!({"id": 2, "t": "B"})], now)
            .await
            .unwrap();
        assert_eq!(second, UpsertSummary { fetched: 2, changed: 1, removed: 0 });

        let page = repo.paginate_records(Some("posts"), 1, 50).await.unwrap();
        assert_eq!(page.total, 2);
        assert!(page.items.iter().any(|r| r.payload == json!({"id": 2, "t": "B"})));
    }

    #[tokio::test]
    async fn test_upsert_removes_vanished_records() {
        let repo = MemoryRepository::new(10);
        let users = source("users");
        let now = Utc::now();

        repo.upsert_records(&users, &[json!({"id": 1}), json!({"id": 2}), json!({"name": "no id"})], now)
            .await
            .unwrap();
        let summary = repo.upsert_records(&users, &[json!({"id": 2})], now).await.unwrap();
        assert_eq!(summary.removed, 2);
        assert_eq!(summary.changed, 0);

        let page = repo.paginate_records(None, 1, 50).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].external_id, Some(2));
    }

    #[tokio::test]
    async fn test_sources_do_not_collide() {
        let repo = MemoryRepository::new(10);
        let now = Utc::now();
        repo.upsert_records(&source("posts"), &[json!({"id": 1})], now).await.unwrap();
        repo.upsert_records(&source("todos"), &[json!({"id": 1})], now).await.unwrap();

        // An empty response for one source must not touch the other
        repo.upsert_records(&source("posts"), &[], now).await.unwrap();
        let stats = repo.source_stats().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].source_key, "todos");
        assert_eq!(stats[0].record_count, 1);
    }

    #[tokio::test]
    async fn test_pagination_newest_first() {
        let repo = MemoryRepository::new(10);
        let posts = source("posts");
        let earlier = Utc::now() - ChronoDuration::minutes(5);
        repo.upsert_records(&posts, &[json!({"id": 1}), json!({"id": 2})], earlier)
            .await
            .unwrap();
        repo.upsert_records(&source("todos"), &[json!({"id": 9})], Utc::now())
            .await
            .unwrap();

        let page = repo.paginate_records(None, 1, 2).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items[0].source_key, "todos");
        assert_eq!(page.items[1].external_id, Some(2));

        let page = repo.paginate_records(None, 2, 2).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].external_id, Some(1));

        let id = page.items[0].id;
        assert_eq!(repo.get_record(id).await.unwrap().unwrap().external_id, Some(1));
        assert!(repo.get_record(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_audit_ring_keeps_newest() {
        let repo = MemoryRepository::new(3);
        for key in ["a", "b", "c", "d"] {
            repo.append_audit(audit(key)).await.unwrap();
        }

        let recent = repo.recent_audits(10).await.unwrap();
        let keys: Vec<_> = recent.iter().map(|e| e.source_key.as_str()).collect();
        assert_eq!(keys, vec!["d", "c", "b"]);
        assert_eq!(recent[0].id, 4);

        assert_eq!(repo.recent_audits(1).await.unwrap().len(), 1);
    }
}
