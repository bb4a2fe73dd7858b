//! Content-addressed cache key generation.

use std::fmt;
use std::io::Write;

use sha2::{Digest, Sha256};

use crate::model::{BoundingBox, FeatureCollection, MAX_PRECISION_DIGITS};

macro_rules! digest_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; 32]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Parse the 64-character hex form produced by `Display`.
            pub fn from_hex(s: &str) -> Option<Self> {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes).ok()?;
                Some(Self(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &hex::encode(self.0)[..12])
            }
        }
    };
}

digest_key!(
    /// Key for a bounding-box fetch: SHA-256 over the canonicalized box and limit.
    FetchKey
);

digest_key!(
    /// Key for derived statistics: SHA-256 over a collection's canonical serialization.
    StatisticsKey
);

/// Compute the cache key for a bounding-box query.
///
/// Coordinates are rounded to `digits` decimal places first, so requests that
/// differ only in floating-point noise share a key. Precision above
/// [`MAX_PRECISION_DIGITS`] is capped.
pub fn compute_fetch_key(bbox: &BoundingBox, limit: usize, digits: u32) -> FetchKey {
    let digits = digits.min(MAX_PRECISION_DIGITS);
    let mut hasher = Sha256::new();
    hasher.update(b"bbox\n");
    hasher.update(digits.to_le_bytes());
    for coord in bbox.canonical(digits) {
        hasher.update(coord.to_le_bytes());
    }
    hasher.update(b"\n");
    hasher.update((limit as u64).to_le_bytes());
    FetchKey(hasher.finalize().into())
}

/// Compute the content hash of a feature collection.
///
/// serde_json maps are ordered by key and floats are printed with a shortest
/// round-trip formatter, so structurally identical collections built
/// independently serialize, and therefore hash, identically.
pub fn compute_statistics_key(collection: &FeatureCollection) -> StatisticsKey {
    let mut writer = HashWriter(Sha256::new());
    // Writing into a hasher cannot fail and the model holds only JSON values.
    let _ = serde_json::to_writer(&mut writer, collection);
    StatisticsKey(writer.0.finalize().into())
}

struct HashWriter(Sha256);

impl Write for HashWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
