//! `stats` command: entry counts per namespace.

use anyhow::Result;
use footprints_core::CacheDb;
use footprints_core::cache::NamespaceCount;
use serde::{Deserialize, Serialize};

/// Output of the `stats` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsOutput {
    pub namespaces: Vec<NamespaceCount>,
    pub total: u64,
}

pub async fn stats_impl(db: &CacheDb) -> Result<String> {
    let namespaces = db.namespace_counts().await?;
    let total = namespaces.iter().map(|n| n.entries).sum();
    Ok(serde_json::to_string_pretty(&StatsOutput { namespaces, total })?)
}
