//! Stale-while-revalidate cache.
//!
//! # Data Flow
//! ```text
//! reader
//!     → swr.rs (freshness check, in-flight dedup, background pool)
//!     → store.rs (CacheStore: load / store / clear)
//!     → entry.rs (immutable dual-value entries)
//! ```

pub mod entry;
pub mod stats;
pub mod store;
pub mod swr;

pub use entry::{CacheEntry, EntryLifetimes, Freshness};
pub use stats::CacheStatsSnapshot;
pub use store::{CacheError, CacheStore, MemoryCacheStore};
pub use swr::{CachePolicy, CacheRead, CacheStatus, SwrCache, SwrError};
