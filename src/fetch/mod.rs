//! Outbound fetching of external sources.
//!
//! # Data Flow
//! ```text
//! SourceDescriptor (built once from config)
//!     → client.rs (HttpFetcher: attempts, retries, deadline)
//!     → FetchResult (records or FetchError, attempts, duration)
//!     → aggregator
//! ```

pub mod client;
pub mod types;

pub use client::{decode_records, HttpFetcher, SourceFetcher};
pub use types::{ErrorClass, FetchError, FetchResult, Records, SourceDescriptor, SourceError};
