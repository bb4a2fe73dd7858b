//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (FOOTPRINTS_*)
//! 2. TOML config file (if FOOTPRINTS_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;

use chrono::Duration;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::Error;

mod validation;

pub use validation::{ConfigError, MAX_TTL_SECS};

/// Values the host application supplies at startup.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (FOOTPRINTS_*)
/// 2. TOML config file (if FOOTPRINTS_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Time-to-live for building footprint fetches, in seconds.
    ///
    /// Set via FOOTPRINTS_TTL_BUILDINGS_SECS environment variable.
    #[serde(default = "default_ttl_buildings_secs")]
    pub ttl_buildings_secs: i64,

    /// Time-to-live for lower-churn metadata lookups (e.g. imagery dates), in seconds.
    ///
    /// Set via FOOTPRINTS_TTL_METADATA_SECS environment variable.
    #[serde(default = "default_ttl_metadata_secs")]
    pub ttl_metadata_secs: i64,

    /// Page size used when the caller does not choose one.
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Page sizes the UI may offer.
    #[serde(default = "default_allowed_page_sizes")]
    pub allowed_page_sizes: Vec<usize>,

    /// Decimal places bounding-box coordinates are rounded to before hashing.
    #[serde(default = "default_precision_digits")]
    pub coordinate_precision_digits: u32,

    /// Maximum statistics entries kept in memory; unbounded when unset.
    #[serde(default)]
    pub statistics_capacity: Option<usize>,

    /// SQLite file backing the caches across restarts; memory only when unset.
    ///
    /// Set via FOOTPRINTS_DB_PATH environment variable.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

fn default_ttl_buildings_secs() -> i64 {
    604_800 // 7 days
}

fn default_ttl_metadata_secs() -> i64 {
    2_592_000 // 30 days
}

fn default_page_size() -> usize {
    10_000
}

fn default_allowed_page_sizes() -> Vec<usize> {
    vec![1_000, 2_500, 5_000, 10_000, 25_000]
}

fn default_precision_digits() -> u32 {
    6
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ttl_buildings_secs: default_ttl_buildings_secs(),
            ttl_metadata_secs: default_ttl_metadata_secs(),
            default_page_size: default_page_size(),
            allowed_page_sizes: default_allowed_page_sizes(),
            coordinate_precision_digits: default_precision_digits(),
            statistics_capacity: None,
            db_path: None,
        }
    }
}

fn ttl(secs: i64) -> Duration {
    Duration::try_seconds(secs).unwrap_or(Duration::MAX)
}

impl AppConfig {
    /// Building TTL; saturates at `Duration::MAX` for unvalidated out-of-range values.
    pub fn ttl_buildings(&self) -> Duration {
        ttl(self.ttl_buildings_secs)
    }

    pub fn ttl_metadata(&self) -> Duration {
        ttl(self.ttl_metadata_secs)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `FOOTPRINTS_`
    /// 2. TOML file from `FOOTPRINTS_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    /// The layered sources [`AppConfig::load`] extracts from.
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("FOOTPRINTS_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment.merge(
            Env::prefixed("FOOTPRINTS_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        )
    }

    /// Extract and validate configuration from arbitrary sources.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Reject page sizes outside the configured set.
    ///
    /// The paginator itself accepts any positive size; this is the UI policy.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` naming the allowed sizes.
    pub fn check_page_size(&self, page_size: usize) -> Result<usize, Error> {
        if self.allowed_page_sizes.contains(&page_size) {
            Ok(page_size)
        } else {
            Err(Error::Validation(format!(
                "page size {page_size} is not one of {:?}",
                self.allowed_page_sizes
            )))
        }
    }
}
