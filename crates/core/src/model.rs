//! Bounding boxes and feature collections.
//!
//! Geometry and attribute values are opaque JSON; the core never interprets
//! geometry, it only caches, hashes and slices what a fetcher returned.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Error;
use crate::cache::hash::{StatisticsKey, compute_statistics_key};

/// Largest supported rounding precision; keeps fixed-point coordinates well inside i64.
pub const MAX_PRECISION_DIGITS: u32 = 12;

/// Axis-aligned longitude/latitude rectangle, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Build a bounding box, rejecting degenerate or non-finite extents.
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self, Error> {
        let bbox = Self { min_lon, min_lat, max_lon, max_lat };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Check `min < max` on both axes.
    ///
    /// Boxes deserialized from host input bypass [`BoundingBox::new`], so
    /// [`crate::FetchCache`] calls this again before any cache lookup.
    pub fn validate(&self) -> Result<(), Error> {
        let coords = [self.min_lon, self.min_lat, self.max_lon, self.max_lat];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(Error::Validation(format!("bounding box has non-finite coordinates: {self}")));
        }
        if self.min_lon >= self.max_lon {
            return Err(Error::Validation(format!(
                "min_lon ({}) must be less than max_lon ({})",
                self.min_lon, self.max_lon
            )));
        }
        if self.min_lat >= self.max_lat {
            return Err(Error::Validation(format!(
                "min_lat ({}) must be less than max_lat ({})",
                self.min_lat, self.max_lat
            )));
        }
        Ok(())
    }

    /// Coordinates as fixed-point integers at `digits` decimal places,
    /// capped at [`MAX_PRECISION_DIGITS`].
    ///
    /// Two boxes differing only below that precision canonicalize identically.
    pub fn canonical(&self, digits: u32) -> [i64; 4] {
        let scale = 10f64.powi(digits.min(MAX_PRECISION_DIGITS) as i32);
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat].map(|c| (c * scale).round() as i64)
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {}, {})", self.min_lon, self.min_lat, self.max_lon, self.max_lat)
    }
}

/// A single geometry record with its attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub geometry: Value,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Value, properties: Map<String, Value>) -> Self {
        Self { geometry, properties }
    }

    /// Look up an attribute, treating JSON `null` as absent.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.properties.get(name).filter(|v| !v.is_null())
    }
}

/// Ordered, immutable sequence of features.
///
/// The order is the order the fetcher returned and is never changed
/// downstream; pagination stability depends on it.
#[derive(Debug, Serialize, Deserialize)]
pub struct FeatureCollection {
    features: Vec<Feature>,
    /// The fetcher stopped at its feature limit.
    #[serde(default)]
    truncated: bool,
    #[serde(skip)]
    content_key: OnceLock<StatisticsKey>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features, truncated: false, content_key: OnceLock::new() }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Mark whether the source had more features than were returned.
    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Content hash over the canonical serialization, computed once.
    pub fn content_key(&self) -> StatisticsKey {
        *self.content_key.get_or_init(|| compute_statistics_key(self))
    }
}

impl Clone for FeatureCollection {
    fn clone(&self) -> Self {
        Self { features: self.features.clone(), truncated: self.truncated, content_key: self.content_key.clone() }
    }
}

impl PartialEq for FeatureCollection {
    fn eq(&self, other: &Self) -> bool {
        self.truncated == other.truncated && self.features == other.features
    }
}

impl FromIterator<Feature> for FeatureCollection {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bbox_rejects_degenerate_axes() {
        assert!(BoundingBox::new(-122.5, 37.7, -122.4, 37.8).is_ok());
        assert!(matches!(BoundingBox::new(-122.4, 37.7, -122.4, 37.8), Err(Error::Validation(_))));
        assert!(matches!(BoundingBox::new(-122.5, 37.8, -122.4, 37.7), Err(Error::Validation(_))));
        assert!(matches!(BoundingBox::new(f64::NAN, 37.7, -122.4, 37.8), Err(Error::Validation(_))));
    }

    #[test]
    fn test_canonical_absorbs_float_noise() {
        let a = BoundingBox::new(-122.5, 37.7, -122.4, 37.8).unwrap();
        let b = BoundingBox::new(-122.500000003, 37.7, -122.4, 37.8).unwrap();
        assert_eq!(a.canonical(6), b.canonical(6));
        assert_eq!(a.canonical(6), [-122_500_000, 37_700_000, -122_400_000, 37_800_000]);
    }

    #[test]
    fn test_canonical_distinguishes_above_precision() {
        let a = BoundingBox::new(-122.5, 37.7, -122.4, 37.8).unwrap();
        let b = BoundingBox::new(-122.500002, 37.7, -122.4, 37.8).unwrap();
        assert_ne!(a.canonical(6), b.canonical(6));
    }

    #[test]
    fn test_canonical_caps_precision() {
        let a = BoundingBox::new(-122.5, 37.7, -122.4, 37.8).unwrap();
        let b = BoundingBox::new(-10.0, 20.0, -9.0, 21.0).unwrap();
        assert_eq!(a.canonical(30), a.canonical(MAX_PRECISION_DIGITS));
        assert_ne!(a.canonical(30), b.canonical(30));
    }

    #[test]
    fn test_feature_attribute_treats_null_as_absent() {
        let feature = Feature::new(json!(null), json!({"height": null, "class": "house"}).as_object().unwrap().clone());
        assert!(feature.attribute("height").is_none());
        assert_eq!(feature.attribute("class"), Some(&json!("house")));
    }

    #[test]
    fn test_collection_deserializes_without_truncated_flag() {
        let fc: FeatureCollection =
            serde_json::from_value(json!({"features": [{"geometry": {"type": "Point"}}]})).unwrap();
        assert_eq!(fc.len(), 1);
        assert!(!fc.truncated());
        assert!(fc.features()[0].properties.is_empty());
    }
}
