//! Content-addressed caching with expiry and single-flight computation.
//!
//! - [`CacheStore`]: generic in-process store with per-key single-flight,
//!   lazy TTL expiry and optional LRU capacity
//! - SHA-256 cache keys for bounding-box fetches and feature collections
//! - Optional SQLite persisted store (WAL mode, versioned migrations) that
//!   stores survive restarts through

pub mod clock;
pub mod connection;
pub mod entries;
pub mod hash;
pub mod migrations;
pub mod store;

pub use crate::Error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::CacheDb;
pub use entries::{NamespaceCount, PersistedEntry};
pub use hash::{FetchKey, StatisticsKey, compute_fetch_key, compute_statistics_key};
pub use store::{CacheEntry, CacheKey, CacheStats, CacheStore, Resolution};
