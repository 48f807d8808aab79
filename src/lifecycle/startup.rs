//! Startup orchestration.
//!
//! # Responsibilities
//! - Turn a validated config into live components
//! - Initialize subsystems in dependency order:
//!   sources → fetcher → breakers → cache → persistence → aggregator → scheduler
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready), see `main.rs`

use std::sync::Arc;

use crate::aggregator::{AggregateCache, AggregateResult, Aggregator};
use crate::cache::{CachePolicy, MemoryCacheStore};
use crate::config::AppConfig;
use crate::fetch::{HttpFetcher, SourceDescriptor, SourceError, SourceFetcher};
use crate::persistence::{MemoryRepository, Persistence};
use crate::resilience::CircuitRegistry;
use crate::scheduler::RefreshScheduler;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid source: {0}")]
    Source(#[from] SourceError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Everything the HTTP layer serves from.
pub struct Components {
    pub aggregator: Aggregator,
    pub scheduler: Arc<RefreshScheduler>,
}

impl Components {
    /// Assemble around a caller-supplied fetcher and store.
    pub fn assemble(
        config: &AppConfig,
        fetcher: Arc<dyn SourceFetcher>,
        persistence: Arc<dyn Persistence>,
    ) -> Result<Self, StartupError> {
        let sources = config
            .sources
            .iter()
            .map(|source| SourceDescriptor::from_config(source, config.fetch.timeout()))
            .collect::<Result<Vec<_>, _>>()?;

        let circuits = Arc::new(CircuitRegistry::new(&config.circuit_breaker));
        let cache = AggregateCache::new(
            Arc::new(MemoryCacheStore::<AggregateResult>::new()),
            CachePolicy::from_config(&config.cache, &config.timeouts),
        );

        let aggregator = Aggregator::new(
            sources,
            fetcher,
            circuits,
            cache,
            persistence,
            config.fetch.concurrency_limit,
        );
        let scheduler = Arc::new(RefreshScheduler::new(aggregator.clone(), &config.scheduler));

        tracing::info!(
            sources = aggregator.sources().len(),
            fresh_ttl_secs = config.cache.fresh_ttl_secs,
            stale_grace_secs = config.cache.stale_grace_secs,
            scheduler_enabled = config.scheduler.enabled,
            "Components initialized"
        );

        Ok(Self {
            aggregator,
            scheduler,
        })
    }
}

/// Production wiring: HTTP fetcher and in-memory record store.
pub fn build_components(config: &AppConfig) -> Result<Components, StartupError> {
    let fetcher = HttpFetcher::new(&config.fetch, config.retries.clone())?;
    let persistence = MemoryRepository::new(config.persistence.audit_capacity);
    Components::assemble(config, Arc::new(fetcher), Arc::new(persistence))
}
