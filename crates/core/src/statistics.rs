//! Aggregate statistics over feature collections, memoized by content hash.
//!
//! Entries never expire; the key changes whenever the content does.
//! `statistics_capacity` bounds the cache with least recently used eviction.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{CacheStats, CacheStore, StatisticsKey};
use crate::config::AppConfig;
use crate::error::{BoxError, Error};
use crate::model::FeatureCollection;

/// Summary of one numeric attribute. Missing values are excluded from
/// `count`, `min`, `max` and `mean`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub count: u64,
    pub missing: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Value frequencies of one categorical attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyTable {
    pub counts: BTreeMap<String, u64>,
    /// Features where the attribute was absent or null.
    pub missing: u64,
}

/// Per-attribute aggregates of a feature collection.
///
/// Maps are ordered so that equal statistics serialize byte-identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub feature_count: u64,
    pub numeric: BTreeMap<String, NumericSummary>,
    pub categorical: BTreeMap<String, FrequencyTable>,
}

/// The aggregation collaborator.
pub trait Aggregator: Send + Sync {
    fn aggregate(&self, collection: &FeatureCollection) -> Result<Statistics, BoxError>;
}

#[derive(Debug, thiserror::Error)]
#[error("malformed attribute {attribute:?} at feature {index}: expected {expected}, found {found}")]
pub struct MalformedAttribute {
    pub attribute: String,
    pub index: usize,
    pub expected: &'static str,
    pub found: Value,
}

enum Accumulator {
    Numeric { count: u64, min: f64, max: f64, sum: f64 },
    Categorical(BTreeMap<String, u64>),
}

/// Categorical bucket key for a scalar, or `None` for nested values.
fn category(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Default single-pass aggregator.
///
/// Each attribute's kind is fixed by its first present value: numbers are
/// numeric, strings and booleans are categorical, arrays and objects are
/// nested data and skipped. A later value of another kind fails the
/// aggregation with [`MalformedAttribute`].
#[derive(Debug, Clone, Default)]
pub struct AttributeAggregator {
    only: Option<Vec<String>>,
}

impl AttributeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate only the named attributes.
    pub fn with_attributes<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { only: Some(attributes.into_iter().map(Into::into).collect()) }
    }

    fn wants(&self, name: &str) -> bool {
        self.only.as_ref().is_none_or(|names| names.iter().any(|n| n == name))
    }
}

impl Aggregator for AttributeAggregator {
    fn aggregate(&self, collection: &FeatureCollection) -> Result<Statistics, BoxError> {
        let mut accumulators: BTreeMap<&str, Accumulator> = BTreeMap::new();

        for (index, feature) in collection.features().iter().enumerate() {
            for (name, value) in &feature.properties {
                if value.is_null() || value.is_array() || value.is_object() || !self.wants(name) {
                    continue;
                }
                let malformed = |expected: &'static str| MalformedAttribute {
                    attribute: name.clone(),
                    index,
                    expected,
                    found: value.clone(),
                };

                match accumulators.entry(name.as_str()) {
                    Entry::Vacant(slot) => {
                        let acc = match (value.as_f64(), category(value)) {
                            (Some(n), _) => Accumulator::Numeric { count: 1, min: n, max: n, sum: n },
                            (None, Some(c)) => Accumulator::Categorical(BTreeMap::from([(c, 1)])),
                            (None, None) => return Err(malformed("number, string or boolean").into()),
                        };
                        slot.insert(acc);
                    }
                    Entry::Occupied(mut slot) => match slot.get_mut() {
                        Accumulator::Numeric { count, min, max, sum } => {
                            let n = value.as_f64().ok_or_else(|| malformed("number"))?;
                            *count += 1;
                            *min = min.min(n);
                            *max = max.max(n);
                            *sum += n;
                        }
                        Accumulator::Categorical(counts) => {
                            let c = category(value).ok_or_else(|| malformed("string or boolean"))?;
                            *counts.entry(c).or_default() += 1;
                        }
                    },
                }
            }
        }

        let total = collection.len() as u64;
        let mut stats = Statistics { feature_count: total, ..Default::default() };
        for (name, acc) in accumulators {
            match acc {
                Accumulator::Numeric { count, min, max, sum } => {
                    let summary = NumericSummary { count, missing: total - count, min, max, mean: sum / count as f64 };
                    stats.numeric.insert(name.to_string(), summary);
                }
                Accumulator::Categorical(counts) => {
                    let seen: u64 = counts.values().sum();
                    stats.categorical.insert(name.to_string(), FrequencyTable { counts, missing: total - seen });
                }
            }
        }
        Ok(stats)
    }
}

/// Memoizes an [`Aggregator`] per distinct collection content.
pub struct StatisticsCache {
    store: CacheStore<StatisticsKey, Statistics>,
}

impl Default for StatisticsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsCache {
    /// Unbounded, memory-only cache.
    pub fn new() -> Self {
        Self { store: CacheStore::new() }
    }

    /// Cache bounded by `statistics_capacity` when configured.
    pub fn from_config(config: &AppConfig) -> Self {
        let store = match config.statistics_capacity {
            Some(capacity) => CacheStore::new().with_capacity(capacity),
            None => CacheStore::new(),
        };
        Self { store }
    }

    pub fn with_store(mut self, store: CacheStore<StatisticsKey, Statistics>) -> Self {
        self.store = store;
        self
    }

    /// Statistics over the full `collection`, aggregated at most once per
    /// distinct content hash.
    ///
    /// # Errors
    ///
    /// Returns `Error::Compute` if the aggregator fails; the failure is not cached.
    pub async fn statistics(
        &self, collection: &FeatureCollection, aggregator: &dyn Aggregator,
    ) -> Result<Arc<Statistics>, Error> {
        let key = collection.content_key();
        let (stats, resolution) = self
            .store
            .resolve(&key, None, || async move { aggregator.aggregate(collection) })
            .await?;
        tracing::debug!(key = %key, ?resolution, features = collection.len(), "statistics resolved");
        Ok(stats)
    }

    /// Drop the statistics of one collection.
    pub async fn invalidate(&self, collection: &FeatureCollection) -> bool {
        self.store.clear(&collection.content_key()).await
    }

    pub async fn clear_all(&self) -> usize {
        self.store.clear_all().await
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }
}
