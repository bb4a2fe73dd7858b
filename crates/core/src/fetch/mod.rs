//! Memoized bounding-box fetches.
//!
//! A remote bounding-box query can run for minutes against a rate-limited
//! source. [`FetchCache`] keys each `(bbox, limit)` request by its
//! canonicalized coordinates and runs the caller's [`Fetcher`] at most once
//! per key until the entry expires, however many callers ask concurrently.

pub mod progress;

pub use progress::{NoProgress, ProgressReporter, TracingProgress};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;

use crate::cache::{CacheStats, CacheStore, FetchKey, Resolution, compute_fetch_key};
use crate::config::AppConfig;
use crate::error::{BoxError, Error};
use crate::model::{BoundingBox, FeatureCollection, MAX_PRECISION_DIGITS};

/// Default rounding precision for bounding-box keys (about 0.11 m).
pub const DEFAULT_PRECISION_DIGITS: u32 = 6;

/// The remote query collaborator.
///
/// Implementations own the protocol, authentication and any retry or
/// cancellation policy. Once started, a fetch runs to completion.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self, bbox: &BoundingBox, limit: usize, progress: &dyn ProgressReporter,
    ) -> Result<FeatureCollection, BoxError>;
}

/// Memoizes a [`Fetcher`] behind a [`CacheStore`] keyed by [`FetchKey`].
///
/// The cache owns the fetched collections; callers receive shared handles.
pub struct FetchCache {
    store: CacheStore<FetchKey, FeatureCollection>,
    ttl: Duration,
    precision_digits: u32,
}

impl FetchCache {
    /// Memory-only cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self { store: CacheStore::new(), ttl, precision_digits: DEFAULT_PRECISION_DIGITS }
    }

    /// Cache for building footprints, using `ttl_buildings`.
    pub fn buildings(config: &AppConfig) -> Self {
        Self::new(config.ttl_buildings()).with_precision(config.coordinate_precision_digits)
    }

    /// Cache for lower-churn metadata such as imagery dates, using `ttl_metadata`.
    pub fn metadata(config: &AppConfig) -> Self {
        Self::new(config.ttl_metadata()).with_precision(config.coordinate_precision_digits)
    }

    /// Round keys to `digits` decimal places, capped at [`MAX_PRECISION_DIGITS`].
    pub fn with_precision(mut self, digits: u32) -> Self {
        if digits > MAX_PRECISION_DIGITS {
            tracing::warn!(digits, max = MAX_PRECISION_DIGITS, "coordinate precision capped");
        }
        self.precision_digits = digits.min(MAX_PRECISION_DIGITS);
        self
    }

    /// Replace the backing store, e.g. one with a clock or persisted store attached.
    pub fn with_store(mut self, store: CacheStore<FetchKey, FeatureCollection>) -> Self {
        self.store = store;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The key a request resolves to.
    pub fn key_for(&self, bbox: &BoundingBox, limit: usize) -> FetchKey {
        compute_fetch_key(bbox, limit, self.precision_digits)
    }

    /// Return the features for `bbox`, fetching them only on a miss.
    ///
    /// On a hit `progress` receives a single checkpoint at 100%; on a miss it
    /// receives whatever the fetcher reports.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` if `bbox` is degenerate or `limit` is 0, before any lookup
    /// - `Error::Fetch` if the fetcher fails; the failure is not cached
    pub async fn fetch_features(
        &self, bbox: &BoundingBox, limit: usize, fetcher: &dyn Fetcher, progress: &dyn ProgressReporter,
    ) -> Result<Arc<FeatureCollection>, Error> {
        bbox.validate()?;
        if limit == 0 {
            return Err(Error::Validation("limit must be greater than 0".into()));
        }

        let key = self.key_for(bbox, limit);
        tracing::debug!(key = %key, %bbox, limit, "fetch requested");

        let (collection, resolution) = self
            .store
            .resolve(&key, Some(self.ttl), || async move { fetcher.fetch(bbox, limit, progress).await })
            .await
            .map_err(|e| match e {
                Error::Compute(cause) => Error::Fetch(cause),
                other => other,
            })?;

        match resolution {
            Resolution::Computed => {
                tracing::info!(
                    key = %key,
                    features = collection.len(),
                    truncated = collection.truncated(),
                    "fetched and cached features"
                );
            }
            Resolution::Joined => {
                tracing::debug!(key = %key, "joined in-flight fetch");
                progress.report("Joined in-flight fetch", 100);
            }
            Resolution::Hit | Resolution::Restored => {
                tracing::debug!(key = %key, ?resolution, "fetch cache hit");
                progress.report("Loaded from cache", 100);
            }
        }

        Ok(collection)
    }

    /// Cached features for a request, without fetching.
    pub async fn cached(&self, bbox: &BoundingBox, limit: usize) -> Option<Arc<FeatureCollection>> {
        self.store.get(&self.key_for(bbox, limit)).await.map(|entry| entry.value)
    }

    /// Drop the entry for one request.
    pub async fn invalidate(&self, bbox: &BoundingBox, limit: usize) -> bool {
        self.store.clear(&self.key_for(bbox, limit)).await
    }

    /// Drop every entry.
    pub async fn clear_all(&self) -> usize {
        self.store.clear_all().await
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::model::Feature;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns `count` point features, reporting 0/50/100 along the way.
    struct StubFetcher {
        calls: AtomicUsize,
        count: usize,
        fail: bool,
        delay_ms: u64,
    }

    impl StubFetcher {
        fn new(count: usize) -> Self {
            Self { calls: AtomicUsize::new(0), count, fail: false, delay_ms: 0 }
        }

        fn failing() -> Self {
            Self { fail: true, ..Self::new(0) }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(
            &self, bbox: &BoundingBox, limit: usize, progress: &dyn ProgressReporter,
        ) -> Result<FeatureCollection, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            progress.report("Initializing query", 0);
            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail {
                return Err("remote source unavailable".into());
            }
            progress.report("Downloading", 50);
            let features = (0..self.count.min(limit))
                .map(|i| {
                    let geometry = json!({"type": "Point", "coordinates": [bbox.min_lon, bbox.min_lat]});
                    Feature::new(geometry, json!({"id": i}).as_object().unwrap().clone())
                })
                .collect::<FeatureCollection>()
                .with_truncated(self.count > limit);
            progress.report("Complete", 100);
            Ok(features)
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, u8)>>);

    impl ProgressReporter for Recorder {
        fn report(&self, message: &str, percent: u8) {
            self.0.lock().unwrap().push((message.to_string(), percent));
        }
    }

    impl Recorder {
        fn percents(&self) -> Vec<u8> {
            self.0.lock().unwrap().iter().map(|(_, p)| *p).collect()
        }
    }

    fn sf_bbox() -> BoundingBox {
        BoundingBox::new(-122.5, 37.7, -122.4, 37.8).unwrap()
    }

    #[tokio::test]
    async fn test_validation_precedes_lookup() {
        let cache = FetchCache::new(Duration::days(7));
        let fetcher = StubFetcher::new(3);
        let degenerate = BoundingBox { min_lon: -122.4, min_lat: 37.7, max_lon: -122.5, max_lat: 37.8 };

        let err = cache.fetch_features(&degenerate, 10, &fetcher, &NoProgress).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = cache.fetch_features(&sf_bbox(), 0, &fetcher, &NoProgress).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(fetcher.calls(), 0);
        assert_eq!(cache.stats().misses, 0);
    }

    #[tokio::test]
    async fn test_rounding_equivalent_request_is_hit() {
        let cache = FetchCache::new(Duration::days(7));
        let fetcher = StubFetcher::new(5);

        let first = cache.fetch_features(&sf_bbox(), 1000, &fetcher, &NoProgress).await.unwrap();
        let noisy = BoundingBox::new(-122.500000003, 37.7, -122.4, 37.8).unwrap();
        let progress = Recorder::default();
        let second = cache.fetch_features(&noisy, 1000, &fetcher, &progress).await.unwrap();

        assert_eq!(fetcher.calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(progress.percents(), vec![100]);
    }

    #[tokio::test]
    async fn test_miss_forwards_fetcher_progress() {
        let cache = FetchCache::new(Duration::days(7));
        let fetcher = StubFetcher::new(5);
        let progress = Recorder::default();

        cache.fetch_features(&sf_bbox(), 1000, &fetcher, &progress).await.unwrap();
        assert_eq!(progress.percents(), vec![0, 50, 100]);
    }

    #[tokio::test]
    async fn test_failure_maps_to_fetch_error_and_is_retried() {
        let cache = FetchCache::new(Duration::days(7));
        let failing = StubFetcher::failing();

        let err = cache.fetch_features(&sf_bbox(), 10, &failing, &NoProgress).await.unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
        assert!(err.to_string().contains("remote source unavailable"));
        assert!(cache.cached(&sf_bbox(), 10).await.is_none());

        let working = StubFetcher::new(2);
        let fc = cache.fetch_features(&sf_bbox(), 10, &working, &NoProgress).await.unwrap();
        assert_eq!(fc.len(), 2);
        assert_eq!(working.calls(), 1);
    }

    #[tokio::test]
    async fn test_limit_is_part_of_key() {
        let cache = FetchCache::new(Duration::days(7));
        let fetcher = StubFetcher::new(50);

        let small = cache.fetch_features(&sf_bbox(), 10, &fetcher, &NoProgress).await.unwrap();
        let large = cache.fetch_features(&sf_bbox(), 100, &fetcher, &NoProgress).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(small.len(), 10);
        assert!(small.truncated());
        assert_eq!(large.len(), 50);
        assert!(!large.truncated());
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let clock = Arc::new(ManualClock::default());
        let config = AppConfig::default();
        let cache = FetchCache::metadata(&config).with_store(CacheStore::new().with_clock(clock.clone()));
        let fetcher = StubFetcher::new(1);

        cache.fetch_features(&sf_bbox(), 1, &fetcher, &NoProgress).await.unwrap();
        clock.advance(Duration::days(30));
        cache.fetch_features(&sf_bbox(), 1, &fetcher, &NoProgress).await.unwrap();
        assert_eq!(fetcher.calls(), 1);

        clock.advance(Duration::seconds(1));
        cache.fetch_features(&sf_bbox(), 1, &fetcher, &NoProgress).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_fetch() {
        let cache = Arc::new(FetchCache::new(Duration::days(7)));
        let fetcher = Arc::new(StubFetcher { delay_ms: 50, ..StubFetcher::new(20) });
        let barrier = Arc::new(tokio::sync::Barrier::new(10));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let (cache, fetcher, barrier) = (Arc::clone(&cache), Arc::clone(&fetcher), Arc::clone(&barrier));
                tokio::spawn(async move {
                    barrier.wait().await;
                    cache.fetch_features(&sf_bbox(), 1000, fetcher.as_ref(), &NoProgress).await
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(fetcher.calls(), 1);
        assert!(results.iter().all(|fc| Arc::ptr_eq(fc, &results[0])));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let cache = FetchCache::new(Duration::days(7));
        let fetcher = StubFetcher::new(1);

        cache.fetch_features(&sf_bbox(), 5, &fetcher, &NoProgress).await.unwrap();
        assert!(cache.invalidate(&sf_bbox(), 5).await);
        cache.fetch_features(&sf_bbox(), 5, &fetcher, &NoProgress).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_excess_precision_keeps_areas_apart() {
        let cache = FetchCache::new(Duration::days(7)).with_precision(19);
        let fetcher = StubFetcher::new(1);
        let elsewhere = BoundingBox::new(-10.0, 20.0, -9.0, 21.0).unwrap();

        assert_ne!(cache.key_for(&sf_bbox(), 5), cache.key_for(&elsewhere, 5));
        cache.fetch_features(&sf_bbox(), 5, &fetcher, &NoProgress).await.unwrap();
        cache.fetch_features(&elsewhere, 5, &fetcher, &NoProgress).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }
}
