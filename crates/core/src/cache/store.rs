//! In-process key/value store with lazy expiry and single-flight computation.
//!
//! Each key has at most one computation in flight. Callers that arrive while
//! it runs subscribe to a watch channel and receive the same outcome, success
//! or failure. Failures are handed to those waiters and then forgotten, never
//! stored. Unrelated keys never wait on each other: the state mutex is only
//! held for map operations, never across an await.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use super::clock::{Clock, SystemClock};
use super::connection::CacheDb;
use super::entries::PersistedEntry;
use crate::error::{BoxError, Cause, Error};

/// Bounds for cache keys. The `Display` form is the persisted key.
pub trait CacheKey: Eq + Hash + Clone + Display + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Eq + Hash + Clone + Display + Send + Sync + 'static {}

/// A stored value with its insertion time and optional time-to-live.
#[derive(Debug)]
pub struct CacheEntry<V> {
    pub value: Arc<V>,
    pub inserted_at: DateTime<Utc>,
    pub ttl: Option<Duration>,
}

impl<V> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self { value: Arc::clone(&self.value), inserted_at: self.inserted_at, ttl: self.ttl }
    }
}

impl<V> CacheEntry<V> {
    /// Live iff there is no TTL or `now - inserted_at <= ttl`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.ttl.is_none_or(|ttl| now - self.inserted_at <= ttl)
    }
}

/// How a value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Live entry in memory.
    Hit,
    /// Live entry loaded from the persisted store.
    Restored,
    /// Received from a computation another caller started.
    Joined,
    /// This call ran the computation.
    Computed,
}

impl Resolution {
    pub fn is_cached(self) -> bool {
        !matches!(self, Resolution::Computed)
    }
}

/// Point-in-time counters for one store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub computations: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
}

type Outcome<V> = Option<Result<Arc<V>, Cause>>;

struct Slot<V> {
    entry: CacheEntry<V>,
    last_access: u64,
}

struct State<K, V> {
    entries: HashMap<K, Slot<V>>,
    in_flight: HashMap<K, watch::Receiver<Outcome<V>>>,
    tick: u64,
}

impl<K: CacheKey, V> State<K, V> {
    fn live_entry(&mut self, key: &K, now: DateTime<Utc>) -> Option<CacheEntry<V>> {
        self.tick += 1;
        let tick = self.tick;
        let live = self.entries.get(key).map(|slot| slot.entry.is_live(now))?;
        if !live {
            self.entries.remove(key);
            return None;
        }
        let slot = self.entries.get_mut(key)?;
        slot.last_access = tick;
        Some(slot.entry.clone())
    }

    fn insert(&mut self, key: K, entry: CacheEntry<V>, capacity: Option<usize>) {
        self.tick += 1;
        self.entries.insert(key, Slot { entry, last_access: self.tick });
        let Some(capacity) = capacity else { return };
        while self.entries.len() > capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, slot)| slot.last_access)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    self.entries.remove(&k);
                    tracing::debug!(key = %k, "evicted least recently used entry");
                }
                None => break,
            }
        }
    }
}

enum Flight<V> {
    Lead(watch::Sender<Outcome<V>>),
    Follow(watch::Receiver<Outcome<V>>),
}

struct Persistence {
    db: CacheDb,
    namespace: String,
}

/// Generic key/value store with expiry, optional LRU capacity and
/// single-flight computation.
pub struct CacheStore<K, V> {
    state: Mutex<State<K, V>>,
    clock: Arc<dyn Clock>,
    capacity: Option<usize>,
    persistence: Option<Persistence>,
    counters: Counters,
}

impl<K: CacheKey, V> Default for CacheStore<K, V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CacheStore<K, V>
where
    K: CacheKey,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Unbounded, memory-only store on the system clock.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State { entries: HashMap::new(), in_flight: HashMap::new(), tick: 0 }),
            clock: Arc::new(SystemClock),
            capacity: None,
            persistence: None,
            counters: Counters::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Evict the least recently used entry once more than `capacity` are held.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Restore misses from and write computed values through to `db` under `namespace`.
    pub fn with_persistence(mut self, db: CacheDb, namespace: impl Into<String>) -> Self {
        self.persistence = Some(Persistence { db, namespace: namespace.into() });
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Read a live entry without ever triggering computation.
    ///
    /// If a computation for `key` is in flight, waits for it to finish first.
    pub async fn get(&self, key: &K) -> Option<CacheEntry<V>> {
        let pending = self.state.lock().in_flight.get(key).cloned();
        if let Some(mut rx) = pending {
            // Outcome is read back from the map below; a failure leaves nothing to read.
            let _ = rx.wait_for(Option::is_some).await;
        }

        let now = self.clock.now();
        if let Some(entry) = self.state.lock().live_entry(key, now) {
            return Some(entry);
        }

        let entry = self.restore(key).await?;
        self.state.lock().insert(key.clone(), entry.clone(), self.capacity);
        Some(entry)
    }

    /// Return the live value for `key`, computing and storing it on a miss.
    ///
    /// # Errors
    ///
    /// Returns `Error::Compute` if `compute` fails, for this caller and every
    /// caller that joined the same in-flight computation.
    pub async fn get_or_compute<F, Fut>(&self, key: &K, ttl: Option<Duration>, compute: F) -> Result<Arc<V>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, BoxError>>,
    {
        self.resolve(key, ttl, compute).await.map(|(value, _)| value)
    }

    /// Like [`CacheStore::get_or_compute`], also reporting how the value was obtained.
    pub async fn resolve<F, Fut>(
        &self, key: &K, ttl: Option<Duration>, compute: F,
    ) -> Result<(Arc<V>, Resolution), Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, BoxError>>,
    {
        let tx = loop {
            let flight = {
                let mut state = self.state.lock();
                if let Some(entry) = state.live_entry(key, self.clock.now()) {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok((entry.value, Resolution::Hit));
                }
                match state.in_flight.get(key) {
                    Some(rx) => Flight::Follow(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        state.in_flight.insert(key.clone(), rx);
                        Flight::Lead(tx)
                    }
                }
            };

            match flight {
                Flight::Lead(tx) => break tx,
                Flight::Follow(mut rx) => {
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(outcome) => outcome.clone(),
                        // Leader was dropped before finishing; race for leadership again.
                        Err(_) => continue,
                    };
                    match outcome {
                        Some(Ok(value)) => {
                            self.counters.hits.fetch_add(1, Ordering::Relaxed);
                            return Ok((value, Resolution::Joined));
                        }
                        Some(Err(cause)) => return Err(Error::Compute(cause)),
                        None => continue,
                    }
                }
            }
        };

        let mut flight = LeaderGuard { store: self, key, tx: Some(tx) };
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        if let Some(entry) = self.restore(key).await {
            let value = Arc::clone(&entry.value);
            flight.complete(Ok(entry));
            tracing::debug!(key = %key, "restored entry from persisted store");
            return Ok((value, Resolution::Restored));
        }

        self.counters.computations.fetch_add(1, Ordering::Relaxed);
        match compute().await {
            Ok(value) => {
                let entry = CacheEntry { value: Arc::new(value), inserted_at: self.clock.now(), ttl };
                flight.complete(Ok(entry.clone()));
                self.persist(key, &entry).await;
                Ok((entry.value, Resolution::Computed))
            }
            Err(err) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                let cause: Cause = Arc::from(err);
                tracing::debug!(key = %key, error = %cause, "computation failed; not cached");
                flight.complete(Err(Arc::clone(&cause)));
                Err(Error::Compute(cause))
            }
        }
    }

    /// Drop one entry from memory and the persisted store.
    ///
    /// Returns whether anything was removed.
    pub async fn clear(&self, key: &K) -> bool {
        let mut removed = self.state.lock().entries.remove(key).is_some();
        if let Some(p) = &self.persistence {
            match p.db.delete_entry(&p.namespace, &key.to_string()).await {
                Ok(deleted) => removed |= deleted,
                Err(e) => tracing::warn!(namespace = %p.namespace, error = %e, "persisted cache delete failed"),
            }
        }
        removed
    }

    /// Drop every entry. Computations in flight are unaffected.
    ///
    /// Returns the number of in-memory entries removed.
    pub async fn clear_all(&self) -> usize {
        let removed = {
            let mut state = self.state.lock();
            let n = state.entries.len();
            state.entries.clear();
            n
        };
        if let Some(p) = &self.persistence {
            match p.db.clear_namespace(&p.namespace).await {
                Ok(deleted) => tracing::info!(namespace = %p.namespace, deleted, "cleared persisted cache"),
                Err(e) => tracing::warn!(namespace = %p.namespace, error = %e, "persisted cache clear failed"),
            }
        }
        removed
    }

    /// Number of entries held in memory, including not yet evicted expired ones.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            computations: self.counters.computations.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    async fn restore(&self, key: &K) -> Option<CacheEntry<V>> {
        let p = self.persistence.as_ref()?;
        let row = match p.db.get_entry(&p.namespace, &key.to_string()).await {
            Ok(row) => row?,
            Err(e) => {
                tracing::warn!(namespace = %p.namespace, error = %e, "persisted cache read failed; treating as miss");
                return None;
            }
        };
        if !row.has_valid_ttl() {
            tracing::warn!(
                namespace = %p.namespace,
                ttl_secs = ?row.ttl_secs,
                "persisted cache entry has an out-of-range ttl; ignoring"
            );
            return None;
        }
        if !row.is_live(self.clock.now()) {
            return None;
        }
        match serde_json::from_str::<V>(&row.value_json) {
            Ok(value) => Some(CacheEntry { value: Arc::new(value), inserted_at: row.inserted_at, ttl: row.ttl() }),
            Err(e) => {
                tracing::warn!(namespace = %p.namespace, error = %e, "persisted cache entry is unreadable; ignoring");
                None
            }
        }
    }

    async fn persist(&self, key: &K, entry: &CacheEntry<V>) {
        let Some(p) = &self.persistence else { return };
        let value_json = match serde_json::to_string(&*entry.value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(namespace = %p.namespace, error = %e, "could not serialize entry for persisted cache");
                return;
            }
        };
        let row = PersistedEntry {
            namespace: p.namespace.clone(),
            key: key.to_string(),
            value_json,
            inserted_at: entry.inserted_at,
            ttl_secs: entry.ttl.map(|ttl| ttl.num_seconds()),
        };
        if let Err(e) = p.db.put_entry(&row).await {
            tracing::warn!(namespace = %p.namespace, error = %e, "persisted cache write failed");
        }
    }
}

/// Owns the leader's side of an in-flight computation.
///
/// If the leader's future is dropped before completing, the in-flight marker
/// is removed and the sender closes, so waiting callers retry.
struct LeaderGuard<'a, K: CacheKey, V> {
    store: &'a CacheStore<K, V>,
    key: &'a K,
    tx: Option<watch::Sender<Outcome<V>>>,
}

impl<K: CacheKey, V> LeaderGuard<'_, K, V> {
    fn complete(&mut self, outcome: Result<CacheEntry<V>, Cause>) {
        let published = {
            let mut state = self.store.state.lock();
            state.in_flight.remove(self.key);
            match outcome {
                Ok(entry) => {
                    let value = Arc::clone(&entry.value);
                    state.insert(self.key.clone(), entry, self.store.capacity);
                    Ok(value)
                }
                Err(cause) => Err(cause),
            }
        };
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(published));
        }
    }
}

impl<K: CacheKey, V> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.store.state.lock().in_flight.remove(self.key);
        }
    }
}
