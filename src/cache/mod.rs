//! Cache Layer
//!
//! Best-effort, time-bounded cache in front of the normative store and the
//! per-item pipeline. Nothing here ever fails a caller: backend and codec
//! errors become misses (on read) or `false` (on write) and are counted.

pub mod backend;
pub mod codec;
pub mod keys;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub use backend::{CacheBackend, CacheError, KeyPattern, MokaBackend};
pub use keys::{content_hash, CacheKey};

/// TTL for normative statistics, thresholds and age groups
pub const NORMATIVE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// TTL for normalized metrics and assessments
pub const RESULT_TTL: Duration = Duration::from_secs(60 * 60);

/// TTL for batch status snapshots
pub const BATCH_STATUS_TTL: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate: f64,
    pub entries: u64,
}

pub struct CacheLayer {
    backend: Box<dyn CacheBackend>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl CacheLayer {
    pub fn new(backend: impl CacheBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// In-process moka cache
    pub fn in_memory(config: &CacheConfig) -> Self {
        Self::new(MokaBackend::new(config.max_capacity))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.backend.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                self.record_error(key, &e);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match codec::decode(&bytes) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cache hit: {}", key);
                Some(value)
            }
            Err(e) => {
                self.record_error(key, &e);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a value; returns whether it was written
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let result = codec::encode(value).and_then(|bytes| self.backend.set(key, bytes, ttl));
        match result {
            Ok(()) => true,
            Err(e) => {
                self.record_error(key, &e);
                false
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        match self.backend.delete(key) {
            Ok(existed) => existed,
            Err(e) => {
                self.record_error(key, &e);
                false
            }
        }
    }

    /// Remove every key matching a `*`/`?` glob; returns how many
    pub fn invalidate(&self, pattern: &str) -> usize {
        let result = KeyPattern::new(pattern).and_then(|p| self.backend.invalidate(&p));
        match result {
            Ok(removed) => {
                tracing::debug!("Invalidated {} cache entries matching '{}'", removed, pattern);
                removed
            }
            Err(e) => {
                self.record_error(pattern, &e);
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            hits,
            misses,
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
            entries: self.backend.entry_count(),
        }
    }

    fn record_error(&self, key: &str, error: &CacheError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("Cache operation on '{}' failed: {}", key, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Backend that fails every call
    struct BrokenBackend;

    impl CacheBackend for BrokenBackend {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
        fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
        fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
        fn invalidate(&self, _pattern: &KeyPattern) -> Result<usize, CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
        fn entry_count(&self) -> u64 {
            0
        }
    }

    #[test]
    fn test_set_then_get_counts_hits_and_misses() {
        let cache = CacheLayer::in_memory(&CacheConfig::default());

        assert_eq!(cache.get::<f64>("normative:snr:young_adult"), None);
        assert!(cache.set("normative:snr:young_adult", &18.5, NORMATIVE_TTL));
        assert_eq!(cache.get::<f64>("normative:snr:young_adult"), Some(18.5));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn test_binary_fallback_round_trips_through_layer() {
        let cache = CacheLayer::in_memory(&CacheConfig::default());
        let mut value: HashMap<(u8, u8), String> = HashMap::new();
        value.insert((1, 2), "x".to_string());

        assert!(cache.set("k", &value, RESULT_TTL));
        assert_eq!(cache.get::<HashMap<(u8, u8), String>>("k"), Some(value));
    }

    #[test]
    fn test_type_mismatch_is_a_counted_miss() {
        let cache = CacheLayer::in_memory(&CacheConfig::default());
        cache.set("k", &"text", RESULT_TTL);

        assert_eq!(cache.get::<u64>("k"), None);
        assert_eq!(cache.stats().errors, 1);
    }

    #[test]
    fn test_broken_backend_never_fails_callers() {
        let cache = CacheLayer::new(BrokenBackend);

        assert_eq!(cache.get::<f64>("k"), None);
        assert!(!cache.set("k", &1.0, RESULT_TTL));
        assert!(!cache.delete("k"));
        assert_eq!(cache.invalidate("k*"), 0);
        assert_eq!(cache.stats().errors, 4);
    }

    #[test]
    fn test_invalidate_and_delete() {
        let cache = CacheLayer::in_memory(&CacheConfig::default());
        cache.set("assessment:a", &1, RESULT_TTL);
        cache.set("assessment:b", &2, RESULT_TTL);
        cache.set("batch_status:x", &3, BATCH_STATUS_TTL);

        assert_eq!(cache.invalidate("assessment:*"), 2);
        assert!(cache.delete("batch_status:x"));
        assert_eq!(cache.stats().entries, 0);
    }
}
