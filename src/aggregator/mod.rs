//! Aggregation of all sources into one cached summary.

pub mod service;
pub mod types;

pub use service::{AggregateCache, Aggregator, AGGREGATE_CACHE_KEY};
pub use types::{
    AggregateError, AggregateResult, AggregateStatus, RefreshReport, SourceFailure, SourceSummary, Trigger,
};
