//! Cache key construction
//!
//! Keys are `namespace:part:part...`. Scalar parts are written verbatim;
//! structured parts are replaced by a 16-hex-character SHA-256 prefix of
//! their serialized form. Optional parts are `-` when absent and `s=<hash>`
//! when present, so no present value can spell the absent marker.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Display;

pub const NORMATIVE: &str = "normative";
pub const THRESHOLDS: &str = "thresholds";
pub const AGE_GROUPS: &str = "age_groups";
pub const NORMALIZED: &str = "normalized";
pub const ASSESSMENT: &str = "assessment";
pub const BATCH_STATUS: &str = "batch_status";

#[derive(Debug, Clone)]
pub struct CacheKey {
    key: String,
}

impl CacheKey {
    pub fn new(namespace: &str) -> Self {
        Self {
            key: namespace.to_string(),
        }
    }

    /// Append a scalar part verbatim
    pub fn part(mut self, part: impl Display) -> Self {
        self.key.push(':');
        self.key.push_str(&part.to_string());
        self
    }

    /// Append an optional part; `None` becomes `-`, `Some` a tagged hash
    pub fn opt_part(self, part: Option<impl Display>) -> Self {
        match part {
            Some(part) => {
                let hash = content_hash(&part.to_string());
                self.part(format!("s={}", hash))
            }
            None => self.part("-"),
        }
    }

    /// Append the content hash of a structured part
    pub fn hashed<T: Serialize + ?Sized>(self, part: &T) -> Self {
        let hash = content_hash(part);
        self.part(hash)
    }

    pub fn build(self) -> String {
        self.key
    }
}

/// First 16 hex characters of SHA-256 over the value's serialized form
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> String {
    let bytes = serde_json::to_vec(value)
        .or_else(|_| bincode::serialize(value))
        .unwrap_or_default();

    let digest = Sha256::digest(&bytes);
    let mut hash = hex::encode(digest);
    hash.truncate(16);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Metric, RawMetrics};

    #[test]
    fn test_scalar_parts_are_verbatim() {
        let key = CacheKey::new(NORMATIVE)
            .part(Metric::Snr)
            .part("young_adult")
            .build();
        assert_eq!(key, "normative:snr:young_adult");

        let key = CacheKey::new(ASSESSMENT).opt_part(None::<f64>).build();
        assert_eq!(key, "assessment:-");
    }

    #[test]
    fn test_absent_part_differs_from_any_present_name() {
        let absent = CacheKey::new(ASSESSMENT).opt_part(None::<&str>).build();
        for name in ["none", "-", "", "s=", "a:b"] {
            let present = CacheKey::new(ASSESSMENT).opt_part(Some(name)).build();
            assert_ne!(absent, present, "study {:?} collides with no study", name);
            assert!(present.starts_with("assessment:s="));
            assert_eq!(present.split(':').count(), 2);
        }

        let a = CacheKey::new(ASSESSMENT).opt_part(Some("a:b")).opt_part(None::<&str>).build();
        let b = CacheKey::new(ASSESSMENT).opt_part(Some("a")).opt_part(Some("b")).build();
        assert_ne!(a, b);
    }

    #[test]
    fn test_structured_parts_are_hashed() {
        let metrics = RawMetrics::new().with(Metric::Snr, 12.5);
        let key = CacheKey::new(ASSESSMENT).hashed(&metrics).part(25).build();

        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 16);
        assert!(parts[1].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_content_hash_is_deterministic() {
        let a = RawMetrics::new().with(Metric::Snr, 12.5).with(Metric::Cnr, 3.0);
        let b = RawMetrics::new().with(Metric::Cnr, 3.0).with(Metric::Snr, 12.5);
        let c = RawMetrics::new().with(Metric::Snr, 12.6);

        assert_eq!(content_hash(&a), content_hash(&b));
        assert_ne!(content_hash(&a), content_hash(&c));
    }
}
