//! footprints operator CLI.
//!
//! Inspects and purges the persisted cache shared by the footprint services.
//! Logs go to stderr; command output is JSON on stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use footprints_core::{AppConfig, CacheDb};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "footprints", version, about = "Inspect and purge the footprints cache")]
struct Cli {
    /// SQLite cache file; defaults to the configured `db_path`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show entry counts per namespace.
    Stats,
    /// Delete expired, excess, or namespaced entries.
    Purge(commands::purge::PurgeArgs),
    /// Delete every entry.
    Clear,
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let db_path = match cli.db {
        Some(path) => path,
        None => AppConfig::load()?
            .db_path
            .context("no cache database: pass --db or set FOOTPRINTS_DB_PATH")?,
    };
    tracing::info!(path = %db_path.display(), "opening cache database");
    let db = CacheDb::open(&db_path)
        .await
        .with_context(|| format!("failed to open {}", db_path.display()))?;

    let output = match cli.command {
        Command::Stats => commands::stats::stats_impl(&db).await?,
        Command::Purge(args) => commands::purge::purge_impl(&db, args).await?,
        Command::Clear => commands::purge::clear_impl(&db).await?,
    };
    println!("{output}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_purge_flags() {
        let cli = Cli::try_parse_from(["footprints", "--db", "cache.db", "purge", "--expired", "--max-entries", "500"])
            .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("cache.db")));
        match cli.command {
            Command::Purge(args) => {
                assert!(args.expired);
                assert_eq!(args.max_entries, Some(500));
                assert!(args.namespace.is_none());
            }
            other => panic!("expected purge, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["footprints", "stats", "--json-logs"]).unwrap();
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Command::Stats));
    }

    #[test]
    fn test_parse_requires_subcommand() {
        assert!(Cli::try_parse_from(["footprints"]).is_err());
    }
}
