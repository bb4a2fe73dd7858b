//! Process-wide cache instances, built once at startup and passed explicitly.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Error;
use crate::cache::{CacheDb, CacheKey, CacheStore, Clock, SystemClock};
use crate::config::AppConfig;
use crate::fetch::FetchCache;
use crate::statistics::StatisticsCache;

/// Persisted-store namespace of building footprint fetches.
pub const BUILDINGS_NAMESPACE: &str = "buildings";
/// Persisted-store namespace of metadata fetches.
pub const METADATA_NAMESPACE: &str = "metadata";
/// Persisted-store namespace of derived statistics.
pub const STATISTICS_NAMESPACE: &str = "statistics";

/// The caches a host application shares across sessions.
pub struct Caches {
    pub buildings: FetchCache,
    pub metadata: FetchCache,
    pub statistics: StatisticsCache,
    db: Option<CacheDb>,
    clock: Arc<dyn Clock>,
}

fn store<K, V>(clock: &Arc<dyn Clock>, db: Option<&CacheDb>, namespace: &str) -> CacheStore<K, V>
where
    K: CacheKey,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let store = CacheStore::new().with_clock(Arc::clone(clock));
    match db {
        Some(db) => store.with_persistence(db.clone(), namespace),
        None => store,
    }
}

impl Caches {
    /// Build the caches described by `config`, opening `db_path` when set.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted store cannot be opened or migrated.
    pub async fn open(config: &AppConfig) -> Result<Self, Error> {
        let db = match &config.db_path {
            Some(path) => Some(CacheDb::open(path).await?),
            None => None,
        };
        Ok(Self::build(config, db, Arc::new(SystemClock)))
    }

    /// Memory-only caches on the system clock.
    pub fn in_memory(config: &AppConfig) -> Self {
        Self::build(config, None, Arc::new(SystemClock))
    }

    pub fn build(config: &AppConfig, db: Option<CacheDb>, clock: Arc<dyn Clock>) -> Self {
        let buildings =
            FetchCache::buildings(config).with_store(store(&clock, db.as_ref(), BUILDINGS_NAMESPACE));
        let metadata = FetchCache::metadata(config).with_store(store(&clock, db.as_ref(), METADATA_NAMESPACE));

        let mut statistics_store = store(&clock, db.as_ref(), STATISTICS_NAMESPACE);
        if let Some(capacity) = config.statistics_capacity {
            statistics_store = statistics_store.with_capacity(capacity);
        }
        let statistics = StatisticsCache::new().with_store(statistics_store);

        tracing::info!(
            persisted = db.is_some(),
            ttl_buildings_secs = config.ttl_buildings_secs,
            ttl_metadata_secs = config.ttl_metadata_secs,
            statistics_capacity = ?config.statistics_capacity,
            "caches ready"
        );

        Self { buildings, metadata, statistics, db, clock }
    }

    pub fn db(&self) -> Option<&CacheDb> {
        self.db.as_ref()
    }

    /// Delete expired rows from the persisted store.
    ///
    /// In-memory entries expire lazily on read and need no sweep.
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        match &self.db {
            Some(db) => db.purge_expired(self.clock.now()).await,
            None => Ok(0),
        }
    }

    /// Clear every cache, in memory and persisted.
    pub async fn clear_all(&self) -> usize {
        self.buildings.clear_all().await + self.metadata.clear_all().await + self.statistics.clear_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::error::BoxError;
    use crate::fetch::{Fetcher, NoProgress, ProgressReporter};
    use crate::model::{BoundingBox, Feature, FeatureCollection};
    use crate::statistics::AttributeAggregator;
    use async_trait::async_trait;
    use chrono::Duration;
    use serde_json::json;

    struct OneBuilding;

    #[async_trait]
    impl Fetcher for OneBuilding {
        async fn fetch(
            &self, _bbox: &BoundingBox, _limit: usize, progress: &dyn ProgressReporter,
        ) -> Result<FeatureCollection, BoxError> {
            progress.report("Complete", 100);
            let props = json!({"height": 6.0, "class": "house"});
            Ok(FeatureCollection::new(vec![Feature::new(json!(null), props.as_object().unwrap().clone())]))
        }
    }

    /// Buildings whose coordinates and heights use every digit of an f64.
    struct PreciseBuildings;

    #[async_trait]
    impl Fetcher for PreciseBuildings {
        async fn fetch(
            &self, _bbox: &BoundingBox, _limit: usize, _progress: &dyn ProgressReporter,
        ) -> Result<FeatureCollection, BoxError> {
            Ok((0..500)
                .map(|i| {
                    let x = (i + 1) as f64 * 0.1 * 37.7;
                    let geometry = json!({"type": "Point", "coordinates": [-122.0 - x / 1e3, x / 7.0]});
                    Feature::new(geometry, json!({"height": x}).as_object().unwrap().clone())
                })
                .collect())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl Fetcher for Unreachable {
        async fn fetch(
            &self, _bbox: &BoundingBox, _limit: usize, _progress: &dyn ProgressReporter,
        ) -> Result<FeatureCollection, BoxError> {
            Err("fetcher must not be called on a persisted hit".into())
        }
    }

    #[tokio::test]
    async fn test_restart_restores_from_persisted_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig { db_path: Some(dir.path().join("cache.sqlite")), ..Default::default() };
        let bbox = BoundingBox::new(-122.5, 37.7, -122.4, 37.8).unwrap();

        {
            let caches = Caches::open(&config).await.unwrap();
            let fc = caches.buildings.fetch_features(&bbox, 100, &OneBuilding, &NoProgress).await.unwrap();
            caches.statistics.statistics(&fc, &AttributeAggregator::new()).await.unwrap();
        }

        let caches = Caches::open(&config).await.unwrap();
        let fc = caches.buildings.fetch_features(&bbox, 100, &Unreachable, &NoProgress).await.unwrap();
        assert_eq!(fc.len(), 1);
        let stats = caches.statistics.statistics(&fc, &AttributeAggregator::new()).await.unwrap();
        assert_eq!(stats.numeric["height"].mean, 6.0);
        assert_eq!(caches.statistics.stats().computations, 0);
    }

    #[tokio::test]
    async fn test_restart_preserves_full_precision_floats() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig { db_path: Some(dir.path().join("cache.sqlite")), ..Default::default() };
        let bbox = BoundingBox::new(-122.5, 37.7, -122.4, 37.8).unwrap();

        let original_key = {
            let caches = Caches::open(&config).await.unwrap();
            let fc = caches.buildings.fetch_features(&bbox, 500, &PreciseBuildings, &NoProgress).await.unwrap();
            caches.statistics.statistics(&fc, &AttributeAggregator::new()).await.unwrap();
            fc.content_key()
        };

        let caches = Caches::open(&config).await.unwrap();
        let fc = caches.buildings.fetch_features(&bbox, 500, &Unreachable, &NoProgress).await.unwrap();
        assert_eq!(fc.content_key(), original_key);
        caches.statistics.statistics(&fc, &AttributeAggregator::new()).await.unwrap();
        assert_eq!(caches.statistics.stats().computations, 0);
    }

    #[test]
    fn test_unvalidated_ttl_does_not_panic() {
        let config = AppConfig { ttl_buildings_secs: i64::MAX, ttl_metadata_secs: i64::MAX, ..Default::default() };
        let caches = Caches::in_memory(&config);
        assert_eq!(caches.buildings.ttl(), Duration::MAX);
    }

    #[tokio::test]
    async fn test_purge_expired_uses_shared_clock() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::default());
        let caches = Caches::build(&AppConfig::default(), Some(db.clone()), clock.clone());
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();

        caches.buildings.fetch_features(&bbox, 1, &OneBuilding, &NoProgress).await.unwrap();
        caches.metadata.fetch_features(&bbox, 1, &OneBuilding, &NoProgress).await.unwrap();

        clock.advance(Duration::days(8));
        assert_eq!(caches.purge_expired().await.unwrap(), 1);
        let metadata_key = caches.metadata.key_for(&bbox, 1).to_string();
        assert!(db.get_entry(METADATA_NAMESPACE, &metadata_key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_in_memory_has_no_db() {
        let caches = Caches::in_memory(&AppConfig::default());
        assert!(caches.db().is_none());
        assert_eq!(caches.purge_expired().await.unwrap(), 0);
        assert_eq!(caches.clear_all().await, 0);
    }
}
