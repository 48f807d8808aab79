//! Stale-while-revalidate read path.
//!
//! # Read Path
//! ```text
//! load(key)
//!     → Fresh:   return fresh_value (HIT)
//!     → Stale:   return fresh_value (STALE), revalidate in background
//!     → Expired / absent / store error: join or start refresh, wait (MISS)
//! ```
//!
//! # Design Decisions
//! - At most one refresh per key: concurrent callers share one future
//! - Every refresh runs on its own task, so a caller that times out or
//!   disconnects does not cancel it
//! - Background revalidations hold a permit from a bounded pool; with no
//!   permit free the revalidation is skipped and the stale value still served
//! - Store errors degrade to recomputation; they never fail a read

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::cache::entry::{CacheEntry, EntryLifetimes, Freshness};
use crate::cache::stats::{CacheStats, CacheStatsSnapshot};
use crate::cache::store::{CacheError, CacheStore};
use crate::config::{CacheConfig, TimeoutConfig};
use crate::observability::metrics;

/// How a read was answered. Exposed to clients as `X-Cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatus {
    Hit,
    Stale,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Stale => "STALE",
            CacheStatus::Miss => "MISS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheRead<V> {
    pub value: Arc<V>,
    pub status: CacheStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SwrError<E> {
    #[error("{0}")]
    Refresh(E),

    #[error("refresh did not finish within {}ms", .0.as_millis())]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub lifetimes: EntryLifetimes,
    /// Bound on how long a reader waits for a synchronous refresh.
    pub sync_timeout: Duration,
    pub max_background_refreshes: usize,
}

impl CachePolicy {
    pub fn from_config(cache: &CacheConfig, timeouts: &TimeoutConfig) -> Self {
        Self {
            lifetimes: EntryLifetimes {
                fresh_ttl: cache.fresh_ttl(),
                stale_grace: cache.stale_grace(),
            },
            sync_timeout: timeouts.request(),
            max_background_refreshes: cache.max_background_refreshes.max(1),
        }
    }
}

type RefreshFuture<V, E> = Shared<BoxFuture<'static, Result<Arc<V>, E>>>;

pub struct SwrCache<V, E> {
    inner: Arc<Inner<V, E>>,
}

impl<V, E> Clone for SwrCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<V, E> {
    store: Arc<dyn CacheStore<V>>,
    inflight: DashMap<String, RefreshFuture<V, E>>,
    policy: CachePolicy,
    workers: Arc<Semaphore>,
    stats: CacheStats,
}

impl<V, E> SwrCache<V, E>
where
    V: Send + Sync + 'static,
    E: Clone + Display + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn CacheStore<V>>, policy: CachePolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                inflight: DashMap::new(),
                workers: Arc::new(Semaphore::new(policy.max_background_refreshes)),
                policy,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Read `key`, refreshing through `refresh_fn` as the entry's age demands.
    pub async fn get_or_refresh<F, Fut>(&self, key: &str, refresh_fn: F) -> Result<CacheRead<V>, SwrError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let entry = self.inner.load(key).await;
        let freshness = entry
            .as_ref()
            .map_or(Freshness::Expired, |e| e.freshness(Instant::now()));

        match (entry, freshness) {
            (Some(entry), Freshness::Fresh) => {
                self.inner.stats.hit();
                metrics::record_cache_read(CacheStatus::Hit.as_str());
                Ok(CacheRead {
                    value: Arc::clone(&entry.fresh_value),
                    status: CacheStatus::Hit,
                })
            }
            (Some(entry), Freshness::Stale) => {
                self.inner.stats.stale_hit();
                metrics::record_cache_read(CacheStatus::Stale.as_str());
                self.revalidate(key, refresh_fn);
                Ok(CacheRead {
                    value: Arc::clone(&entry.fresh_value),
                    status: CacheStatus::Stale,
                })
            }
            _ => {
                self.inner.stats.miss();
                metrics::record_cache_read(CacheStatus::Miss.as_str());
                let refresh = self.join_or_start(key, refresh_fn);
                let wait = self.inner.policy.sync_timeout;
                match tokio::time::timeout(wait, refresh).await {
                    Ok(Ok(value)) => Ok(CacheRead {
                        value,
                        status: CacheStatus::Miss,
                    }),
                    Ok(Err(error)) => Err(SwrError::Refresh(error)),
                    Err(_) => {
                        tracing::warn!(key, timeout_ms = wait.as_millis() as u64, "Synchronous refresh timed out");
                        Err(SwrError::Timeout(wait))
                    }
                }
            }
        }
    }

    /// Force a refresh of `key`, joining one already in flight.
    pub async fn refresh<F, Fut>(&self, key: &str, refresh_fn: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.join_or_start(key, refresh_fn).await
    }

    /// Drop every entry. Refreshes already in flight still install.
    pub async fn clear(&self) -> Result<usize, CacheError> {
        let removed = self.inner.store.clear().await?;
        tracing::info!(removed, "Cache cleared");
        Ok(removed)
    }

    /// Current entry for `key`, without touching statistics.
    pub async fn peek(&self, key: &str) -> Option<Arc<CacheEntry<V>>> {
        self.inner.store.load(key).await.ok().flatten()
    }

    pub async fn len(&self) -> Result<usize, CacheError> {
        self.inner.store.len().await
    }

    pub fn is_refreshing(&self) -> bool {
        !self.inner.inflight.is_empty()
    }

    /// How long a reader waits on a synchronous refresh.
    pub fn sync_timeout(&self) -> Duration {
        self.inner.policy.sync_timeout
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats.snapshot()
    }

    fn revalidate<F, Fut>(&self, key: &str, refresh_fn: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if self.inner.inflight.contains_key(key) {
            return;
        }

        let Ok(permit) = Arc::clone(&self.inner.workers).try_acquire_owned() else {
            self.inner.stats.revalidation_skipped();
            metrics::record_revalidation("skipped");
            tracing::warn!(key, "Background refresh pool saturated, serving stale value");
            return;
        };

        self.inner.stats.revalidation_started();
        metrics::record_revalidation("started");

        let refresh = self.join_or_start(key, refresh_fn);
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        tokio::spawn(async move {
            let _permit = permit;
            match refresh.await {
                Ok(_) => tracing::debug!(key = %key, "Background refresh installed"),
                Err(error) => {
                    inner.stats.revalidation_failed();
                    metrics::record_revalidation("failed");
                    tracing::warn!(key = %key, error = %error, "Background refresh failed, keeping previous entry");
                }
            }
        });
    }

    fn join_or_start<F, Fut>(&self, key: &str, refresh_fn: F) -> RefreshFuture<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let refresh = match self.inner.inflight.entry(key.to_string()) {
            Entry::Occupied(existing) => return existing.get().clone(),
            Entry::Vacant(slot) => {
                let inner = Arc::clone(&self.inner);
                let key = key.to_string();
                let refresh = async move {
                    let _guard = InflightGuard {
                        inner: Arc::clone(&inner),
                        key: key.clone(),
                    };
                    let value = Arc::new(refresh_fn().await?);
                    inner.install(&key, Arc::clone(&value)).await;
                    Ok(value)
                }
                .boxed()
                .shared();
                slot.insert(refresh.clone());
                refresh
            }
        };

        tokio::spawn(refresh.clone().map(|_| ()));
        refresh
    }
}

impl<V, E> Inner<V, E>
where
    V: Send + Sync + 'static,
{
    async fn load(&self, key: &str) -> Option<Arc<CacheEntry<V>>> {
        match self.store.load(key).await {
            Ok(entry) => entry,
            Err(error) => {
                self.stats.store_error();
                tracing::warn!(key, error = %error, "Cache load failed, treating as miss");
                None
            }
        }
    }

    async fn install(&self, key: &str, value: Arc<V>) {
        let previous = self.load(key).await;
        let entry = CacheEntry::successor(
            previous.as_deref(),
            key,
            value,
            Instant::now(),
            self.policy.lifetimes,
        );
        let version = entry.version;

        if let Err(error) = self.store.store(Arc::new(entry)).await {
            self.stats.store_error();
            tracing::warn!(key, error = %error, "Cache install failed, value served uncached");
            return;
        }
        tracing::debug!(key, version, "Cache entry installed");
    }
}

/// Removes the in-flight marker once the refresh settles, however it settles.
struct InflightGuard<V, E> {
    inner: Arc<Inner<V, E>>,
    key: String,
}

impl<V, E> Drop for InflightGuard<V, E> {
    fn drop(&mut self) {
        self.inner.inflight.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryCacheStore;
    use async_trait::async_trait;
    use futures_util::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KEY: &str = "aggregate";

    fn policy(max_background: usize) -> CachePolicy {
        CachePolicy {
            lifetimes: EntryLifetimes {
                fresh_ttl: Duration::from_secs(10),
                stale_grace: Duration::from_secs(5),
            },
            sync_timeout: Duration::from_secs(2),
            max_background_refreshes: max_background,
        }
    }

    fn cache(max_background: usize) -> SwrCache<String, String> {
        SwrCache::new(Arc::new(MemoryCacheStore::new()), policy(max_background))
    }

    fn counted(
        calls: &Arc<AtomicUsize>,
        value: &'static str,
        delay: Duration,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<String, String>> + Send + 'static {
        let calls = Arc::clone(calls);
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok(value.to_string())
            }
            .boxed()
        }
    }

    async fn prime(cache: &SwrCache<String, String>, value: &'static str) {
        cache
            .refresh(KEY, move || async move { Ok::<_, String>(value.to_string()) })
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_read_skips_refresh() {
        let cache = cache(2);
        prime(&cache, "v1").await;

        let calls = Arc::new(AtomicUsize::new(0));
        let read = cache
            .get_or_refresh(KEY, counted(&calls, "v2", Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(read.status, CacheStatus::Hit);
        assert_eq!(*read.value, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_reads_trigger_one_refresh() {
        let cache = cache(2);
        prime(&cache, "v1").await;
        tokio::time::advance(Duration::from_secs(11)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let reads = join_all(
            (0..16).map(|_| cache.get_or_refresh(KEY, counted(&calls, "v2", Duration::from_millis(100)))),
        )
        .await;

        for read in reads {
            let read = read.unwrap();
            assert_eq!(read.status, CacheStatus::Stale);
            assert_eq!(*read.value, "v1");
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let read = cache
            .get_or_refresh(KEY, counted(&calls, "v3", Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(read.status, CacheStatus::Hit);
        assert_eq!(*read.value, "v2");

        let entry = cache.peek(KEY).await.unwrap();
        assert_eq!(entry.version, 2);
        assert_eq!(entry.stale_value.as_deref().map(String::as_str), Some("v1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_read_waits_for_refresh() {
        let cache = cache(2);
        prime(&cache, "v1").await;
        tokio::time::advance(Duration::from_secs(16)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let read = cache
            .get_or_refresh(KEY, counted(&calls, "v2", Duration::from_millis(500)))
            .await
            .unwrap();

        assert_eq!(read.status, CacheStatus::Miss);
        assert_eq!(*read.value, "v2");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_refresh() {
        let cache = cache(2);
        let calls = Arc::new(AtomicUsize::new(0));

        let reads = join_all(
            (0..8).map(|_| cache.get_or_refresh(KEY, counted(&calls, "v1", Duration::from_millis(50)))),
        )
        .await;

        assert!(reads.iter().all(|r| r.as_ref().unwrap().status == CacheStatus::Miss));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_background_refresh_keeps_entry() {
        let cache = cache(2);
        prime(&cache, "v1").await;
        tokio::time::advance(Duration::from_secs(11)).await;

        let read = cache
            .get_or_refresh(KEY, || async { Err::<String, _>("upstream down".to_string()) })
            .await
            .unwrap();
        assert_eq!(read.status, CacheStatus::Stale);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let entry = cache.peek(KEY).await.unwrap();
        assert_eq!(entry.version, 1);
        assert_eq!(*entry.fresh_value, "v1");
        assert_eq!(cache.stats().revalidations_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_propagates_refresh_error() {
        let cache = cache(2);
        let err = cache
            .get_or_refresh(KEY, || async { Err::<String, _>("all down".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err, SwrError::Refresh("all down".to_string()));
        assert!(cache.peek(KEY).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_timeout_does_not_cancel_refresh() {
        let cache = cache(2);
        let calls = Arc::new(AtomicUsize::new(0));

        let err = cache
            .get_or_refresh(KEY, counted(&calls, "slow", Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err, SwrError::Timeout(Duration::from_secs(2)));

        tokio::time::sleep(Duration::from_secs(4)).await;
        let entry = cache.peek(KEY).await.unwrap();
        assert_eq!(*entry.fresh_value, "slow");
        assert!(!cache.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_forces_miss() {
        let cache = cache(2);
        prime(&cache, "v1").await;
        assert_eq!(cache.clear().await.unwrap(), 1);

        let calls = Arc::new(AtomicUsize::new(0));
        let read = cache
            .get_or_refresh(KEY, counted(&calls, "v2", Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(read.status, CacheStatus::Miss);
        assert_eq!(*read.value, "v2");
        // Fresh generation after a clear has nothing to demote
        assert_eq!(cache.peek(KEY).await.unwrap().version, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_after_clear_joins_inflight_refresh() {
        let cache = cache(2);
        prime(&cache, "v1").await;
        tokio::time::advance(Duration::from_secs(11)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let read = cache
            .get_or_refresh(KEY, counted(&calls, "v2", Duration::from_millis(500)))
            .await
            .unwrap();
        assert_eq!(read.status, CacheStatus::Stale);
        assert!(cache.is_refreshing());

        assert_eq!(cache.clear().await.unwrap(), 1);

        let read = cache
            .get_or_refresh(KEY, counted(&calls, "v3", Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(read.status, CacheStatus::Miss);
        assert_eq!(*read.value, "v2");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let entry = cache.peek(KEY).await.unwrap();
        assert_eq!(*entry.fresh_value, "v2");
        assert_eq!(entry.version, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_pool_skips_revalidation() {
        let cache = cache(1);
        for key in ["a", "b"] {
            cache
                .refresh(key, || async { Ok::<_, String>("v1".to_string()) })
                .await
                .unwrap();
        }
        tokio::time::advance(Duration::from_secs(11)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let a = cache
            .get_or_refresh("a", counted(&calls, "v2", Duration::from_secs(1)))
            .await
            .unwrap();
        let b = cache
            .get_or_refresh("b", counted(&calls, "v2", Duration::from_secs(1)))
            .await
            .unwrap();

        assert_eq!(a.status, CacheStatus::Stale);
        assert_eq!(b.status, CacheStatus::Stale);
        assert_eq!(cache.stats().revalidations_skipped, 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore<String> for BrokenStore {
        async fn load(&self, _key: &str) -> Result<Option<Arc<CacheEntry<String>>>, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn store(&self, _entry: Arc<CacheEntry<String>>) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn clear(&self) -> Result<usize, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn len(&self) -> Result<usize, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_store_degrades_to_recompute() {
        let cache: SwrCache<String, String> = SwrCache::new(Arc::new(BrokenStore), policy(2));
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let read = cache
                .get_or_refresh(KEY, counted(&calls, "computed", Duration::ZERO))
                .await
                .unwrap();
            assert_eq!(read.status, CacheStatus::Miss);
            assert_eq!(*read.value, "computed");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.stats().store_errors >= 4);
        assert!(cache.clear().await.is_err());
    }
}
