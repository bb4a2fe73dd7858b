//! `purge` and `clear` commands.
//!
//! Purges persisted entries by expiry, namespace, or count.

use anyhow::{Result, bail};
use clap::Args;
use footprints_core::CacheDb;
use serde::{Deserialize, Serialize};

/// Arguments for the `purge` command.
#[derive(Debug, Clone, Default, Args)]
pub struct PurgeArgs {
    /// Delete entries whose TTL has elapsed.
    #[arg(long)]
    pub expired: bool,

    /// Delete every entry in this namespace (buildings, metadata, statistics).
    #[arg(long)]
    pub namespace: Option<String>,

    /// Keep only the newest N entries.
    #[arg(long)]
    pub max_entries: Option<usize>,
}

/// Output of the `purge` and `clear` commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeOutput {
    /// Number of entries deleted.
    pub deleted: u64,
}

pub async fn purge_impl(db: &CacheDb, args: PurgeArgs) -> Result<String> {
    if !args.expired && args.namespace.is_none() && args.max_entries.is_none() {
        bail!("at least one of --expired, --namespace, or --max-entries must be specified");
    }

    let mut deleted_total = 0u64;

    if args.expired {
        deleted_total += db.purge_expired(chrono::Utc::now()).await?;
    }

    if let Some(namespace) = args.namespace {
        deleted_total += db.clear_namespace(&namespace).await?;
    }

    if let Some(max_entries) = args.max_entries {
        deleted_total += db.purge_lru(max_entries).await?;
    }

    tracing::info!(deleted = deleted_total, "purged cache entries");
    Ok(serde_json::to_string_pretty(&PurgeOutput { deleted: deleted_total })?)
}

pub async fn clear_impl(db: &CacheDb) -> Result<String> {
    let deleted = db.clear_all().await?;
    tracing::info!(deleted, "cleared cache");
    Ok(serde_json::to_string_pretty(&PurgeOutput { deleted })?)
}
