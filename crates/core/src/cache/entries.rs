//! Persisted entry CRUD and purge operations.
//!
//! Rows are opaque serialized values grouped by namespace (one namespace per
//! cache: buildings, metadata, statistics) with their insertion time and TTL.

use super::connection::CacheDb;
use crate::Error;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// A persisted cache row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub namespace: String,
    pub key: String,
    pub value_json: String,
    pub inserted_at: DateTime<Utc>,
    pub ttl_secs: Option<i64>,
}

impl PersistedEntry {
    /// The row's TTL; `None` when it has none or the stored seconds are out of range.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.and_then(Duration::try_seconds)
    }

    /// False when `ttl_secs` is set but does not fit a `Duration`.
    pub fn has_valid_ttl(&self) -> bool {
        self.ttl_secs.is_none_or(|secs| Duration::try_seconds(secs).is_some())
    }

    /// Live iff there is no TTL or `now - inserted_at <= ttl`. A row with an
    /// out-of-range TTL is never live.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_secs {
            None => true,
            Some(secs) => Duration::try_seconds(secs).is_some_and(|ttl| now - self.inserted_at <= ttl),
        }
    }
}

/// Row count for one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceCount {
    pub namespace: String,
    pub entries: u64,
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl CacheDb {
    /// Get a persisted entry, live or not.
    ///
    /// Expiry is the caller's decision; see [`PersistedEntry::is_live`].
    pub async fn get_entry(&self, namespace: &str, key: &str) -> Result<Option<PersistedEntry>, Error> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<PersistedEntry>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT namespace, key, value_json, inserted_at_ms, ttl_secs
                     FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                )?;

                let result = stmt.query_row(params![namespace, key], |row| {
                    Ok(PersistedEntry {
                        namespace: row.get(0)?,
                        key: row.get(1)?,
                        value_json: row.get(2)?,
                        inserted_at: from_millis(row.get(3)?),
                        ttl_secs: row.get(4)?,
                    })
                });

                match result {
                    Ok(entry) => Ok(Some(entry)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace a persisted entry.
    pub async fn put_entry(&self, entry: &PersistedEntry) -> Result<(), Error> {
        let entry = entry.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cache_entries (namespace, key, value_json, inserted_at_ms, ttl_secs)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(namespace, key) DO UPDATE SET
                        value_json = excluded.value_json,
                        inserted_at_ms = excluded.inserted_at_ms,
                        ttl_secs = excluded.ttl_secs",
                    params![
                        entry.namespace,
                        entry.key,
                        entry.value_json,
                        entry.inserted_at.timestamp_millis(),
                        entry.ttl_secs,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete one entry. Returns whether a row was removed.
    pub async fn delete_entry(&self, namespace: &str, key: &str) -> Result<bool, Error> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every entry in a namespace.
    ///
    /// Returns the number of deleted entries.
    pub async fn clear_namespace(&self, namespace: &str) -> Result<u64, Error> {
        let namespace = namespace.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE namespace = ?1", params![namespace])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every entry in every namespace.
    pub async fn clear_all(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries", [])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete entries whose TTL elapsed before `now`.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let now_ms = now.timestamp_millis();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(
                    "DELETE FROM cache_entries
                     WHERE ttl_secs IS NOT NULL AND inserted_at_ms + ttl_secs * 1000 < ?1",
                    params![now_ms],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Purge oldest entries until count <= max_entries.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_lru(&self, max_entries: usize) -> Result<u64, Error> {
        let max = max_entries as i64;
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
                if count <= max {
                    return Ok(0);
                }

                let to_delete = count - max;
                let deleted = conn.execute(
                    "DELETE FROM cache_entries WHERE rowid IN (
                        SELECT rowid FROM cache_entries ORDER BY inserted_at_ms ASC LIMIT ?1
                    )",
                    params![to_delete],
                )?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Row counts per namespace, ordered by namespace.
    pub async fn namespace_counts(&self) -> Result<Vec<NamespaceCount>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<NamespaceCount>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT namespace, COUNT(*) FROM cache_entries GROUP BY namespace ORDER BY namespace",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(NamespaceCount { namespace: row.get(0)?, entries: row.get::<_, i64>(1)? as u64 })
                })?;
                rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
            })
            .await
            .map_err(Error::from)
    }
}
