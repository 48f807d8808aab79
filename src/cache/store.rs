//! Backing stores for cache entries.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cache::entry::CacheEntry;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

/// Where entries live. The SWR layer absorbs every error from here.
#[async_trait]
pub trait CacheStore<V>: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Arc<CacheEntry<V>>>, CacheError>;

    async fn store(&self, entry: Arc<CacheEntry<V>>) -> Result<(), CacheError>;

    /// Remove everything, returning how many entries were dropped.
    async fn clear(&self) -> Result<usize, CacheError>;

    async fn len(&self) -> Result<usize, CacheError>;
}

/// Process-local store.
pub struct MemoryCacheStore<V> {
    entries: DashMap<String, Arc<CacheEntry<V>>>,
}

impl<V> Default for MemoryCacheStore<V> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<V> MemoryCacheStore<V> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<V: Send + Sync + 'static> CacheStore<V> for MemoryCacheStore<V> {
    async fn load(&self, key: &str) -> Result<Option<Arc<CacheEntry<V>>>, CacheError> {
        Ok(self.entries.get(key).map(|entry| Arc::clone(entry.value())))
    }

    async fn store(&self, entry: Arc<CacheEntry<V>>) -> Result<(), CacheError> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        let removed = self.entries.len();
        self.entries.clear();
        Ok(removed)
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries.len())
    }
}
