//! Dual-value cache entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Where an entry sits on its timeline at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Before `fresh_expires_at`: serve, no refresh.
    Fresh,
    /// Between the two expiries: serve, revalidate in the background.
    Stale,
    /// Past `stale_expires_at`: treat as absent.
    Expired,
}

/// Lifetimes applied to newly installed entries.
#[derive(Debug, Clone, Copy)]
pub struct EntryLifetimes {
    pub fresh_ttl: Duration,
    pub stale_grace: Duration,
}

/// An immutable cache entry. A refresh installs a new entry; it never
/// mutates an existing one.
///
/// `stale_expires_at >= fresh_expires_at` always holds, and `stale_value` is
/// the value this entry's `fresh_value` superseded.
#[derive(Debug)]
pub struct CacheEntry<V> {
    pub key: String,
    pub fresh_value: Arc<V>,
    pub fresh_expires_at: Instant,
    pub stale_value: Option<Arc<V>>,
    pub stale_expires_at: Instant,
    pub version: u64,
}

impl<V> CacheEntry<V> {
    /// Build the entry that replaces `previous` (if any) with `value`.
    pub fn successor(
        previous: Option<&CacheEntry<V>>,
        key: impl Into<String>,
        value: Arc<V>,
        now: Instant,
        lifetimes: EntryLifetimes,
    ) -> Self {
        let fresh_expires_at = now + lifetimes.fresh_ttl;
        Self {
            key: key.into(),
            fresh_value: value,
            fresh_expires_at,
            stale_value: previous.map(|p| Arc::clone(&p.fresh_value)),
            stale_expires_at: fresh_expires_at + lifetimes.stale_grace,
            version: previous.map_or(1, |p| p.version + 1),
        }
    }

    pub fn freshness(&self, now: Instant) -> Freshness {
        if now < self.fresh_expires_at {
            Freshness::Fresh
        } else if now < self.stale_expires_at {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}
