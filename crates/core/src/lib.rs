//! Fetch, statistics and pagination caching for building footprints.
//!
//! This crate provides:
//! - [`CacheStore`]: keyed storage with lazy TTL expiry and single-flight computation
//! - [`FetchCache`]: memoized bounding-box fetches keyed by canonicalized coordinates
//! - [`StatisticsCache`]: memoized aggregates keyed by collection content hash
//! - [`pagination`]: stable, non-copying pages over a feature collection
//! - An optional SQLite persisted store and layered configuration

pub mod cache;
pub mod caches;
pub mod config;
pub mod error;
pub mod fetch;
pub mod model;
pub mod pagination;
pub mod statistics;

pub use cache::{CacheDb, CacheEntry, CacheStore, FetchKey, Resolution, StatisticsKey};
pub use caches::Caches;
pub use config::{AppConfig, ConfigError};
pub use error::{BoxError, Cause, Error};
pub use fetch::{FetchCache, Fetcher, NoProgress, ProgressReporter, TracingProgress};
pub use model::{BoundingBox, Feature, FeatureCollection};
pub use pagination::{PageRequest, PageResult, get_page, pages, paginate};
pub use statistics::{Aggregator, AttributeAggregator, Statistics, StatisticsCache};
