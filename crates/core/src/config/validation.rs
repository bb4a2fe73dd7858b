//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use crate::model::MAX_PRECISION_DIGITS;
use thiserror::Error;

/// Largest accepted TTL, the most seconds a `chrono::Duration` can hold.
pub const MAX_TTL_SECS: i64 = i64::MAX / 1_000;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - either TTL is not positive or exceeds [`MAX_TTL_SECS`]
    /// - `allowed_page_sizes` is empty or contains 0
    /// - `default_page_size` is not one of `allowed_page_sizes`
    /// - `coordinate_precision_digits` exceeds 12
    /// - `statistics_capacity` is set to 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ttls = [("ttl_buildings_secs", self.ttl_buildings_secs), ("ttl_metadata_secs", self.ttl_metadata_secs)];
        for (field, secs) in ttls {
            if secs <= 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
            if secs > MAX_TTL_SECS {
                return Err(invalid(field, format!("must not exceed {MAX_TTL_SECS}")));
            }
        }

        if self.allowed_page_sizes.is_empty() {
            return Err(invalid("allowed_page_sizes", "must not be empty"));
        }
        if self.allowed_page_sizes.contains(&0) {
            return Err(invalid("allowed_page_sizes", "page sizes must be greater than 0"));
        }
        if !self.allowed_page_sizes.contains(&self.default_page_size) {
            return Err(invalid(
                "default_page_size",
                format!("{} is not one of {:?}", self.default_page_size, self.allowed_page_sizes),
            ));
        }

        if self.coordinate_precision_digits > MAX_PRECISION_DIGITS {
            return Err(invalid("coordinate_precision_digits", format!("must not exceed {MAX_PRECISION_DIGITS}")));
        }
        if self.coordinate_precision_digits < 6 {
            tracing::warn!(
                digits = self.coordinate_precision_digits,
                "coordinate precision below 6 decimal places merges visibly different bounding boxes"
            );
        }

        if self.statistics_capacity == Some(0) {
            return Err(invalid("statistics_capacity", "must be greater than 0 when set"));
        }

        Ok(())
    }
}
