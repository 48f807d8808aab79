//! Cache counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    revalidations_started: AtomicU64,
    revalidations_failed: AtomicU64,
    revalidations_skipped: AtomicU64,
    store_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub revalidations_started: u64,
    pub revalidations_failed: u64,
    pub revalidations_skipped: u64,
    pub store_errors: u64,
    /// Share of reads answered from cache, stale included.
    pub hit_rate: f64,
}

impl CacheStats {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stale_hit(&self) {
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn revalidation_started(&self) {
        self.revalidations_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn revalidation_failed(&self) {
        self.revalidations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn revalidation_skipped(&self) {
        self.revalidations_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let stale_hits = self.stale_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let reads = hits + stale_hits + misses;

        CacheStatsSnapshot {
            hits,
            stale_hits,
            misses,
            revalidations_started: self.revalidations_started.load(Ordering::Relaxed),
            revalidations_failed: self.revalidations_failed.load(Ordering::Relaxed),
            revalidations_skipped: self.revalidations_skipped.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            hit_rate: if reads == 0 {
                0.0
            } else {
                (hits + stale_hits) as f64 / reads as f64
            },
        }
    }
}
