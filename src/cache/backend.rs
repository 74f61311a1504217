//! Cache backends
//!
//! The default backend is an in-process `moka::sync::Cache` whose expiry
//! policy reads each entry's own TTL. Reads re-check the stored deadline so a
//! get after the TTL is always a miss, even before moka evicts the entry.

use moka::sync::Cache;
use moka::Expiry;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Backend and codec failures; never escape `CacheLayer`
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Failed to encode cache value: {0}")]
    Encode(String),

    #[error("Failed to decode cache value: {0}")]
    Decode(String),
}

/// Glob over cache keys; `*` matches any run, `?` one character
#[derive(Debug, Clone)]
pub struct KeyPattern {
    regex: Regex,
}

impl KeyPattern {
    pub fn new(glob: &str) -> Result<Self, CacheError> {
        let mut expr = String::with_capacity(glob.len() + 8);
        expr.push('^');
        for ch in glob.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');

        Regex::new(&expr)
            .map(|regex| Self { regex })
            .map_err(|e| CacheError::Backend(format!("invalid key pattern '{}': {}", glob, e)))
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

/// Key/value store with per-entry expiry
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Returns whether the key existed
    fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Removes every key matching the pattern; returns how many
    fn invalidate(&self, pattern: &KeyPattern) -> Result<usize, CacheError>;

    fn entry_count(&self) -> u64;
}

#[derive(Debug)]
struct CacheEntry {
    bytes: Vec<u8>,
    ttl: Duration,
    expires_at: Instant,
}

/// Expire each entry after its own TTL, restarting on overwrite
struct PerEntryTtl;

impl Expiry<String, Arc<CacheEntry>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process backend over moka
pub struct MokaBackend {
    cache: Cache<String, Arc<CacheEntry>>,
}

impl MokaBackend {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }
}

impl CacheBackend for MokaBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self.cache.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.bytes.clone())),
            Some(_) => {
                self.cache.invalidate(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry {
            bytes: value,
            ttl,
            expires_at: Instant::now() + ttl,
        };
        self.cache.insert(key.to_string(), Arc::new(entry));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.cache.remove(key).is_some())
    }

    fn invalidate(&self, pattern: &KeyPattern) -> Result<usize, CacheError> {
        let matching: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(key, _)| pattern.matches(key))
            .map(|(key, _)| key)
            .collect();

        for key in &matching {
            self.cache.invalidate(key.as_str());
        }
        Ok(matching.len())
    }

    fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_key_pattern_wildcards() {
        let pattern = KeyPattern::new("assessment:*").unwrap();
        assert!(pattern.matches("assessment:abc:25:default"));
        assert!(!pattern.matches("normative:snr:young_adult"));

        let single = KeyPattern::new("normative:snr:?").unwrap();
        assert!(single.matches("normative:snr:a"));
        assert!(!single.matches("normative:snr:ab"));

        // Regex metacharacters are literal
        let literal = KeyPattern::new("a.b").unwrap();
        assert!(!literal.matches("axb"));
    }

    #[test]
    fn test_get_after_ttl_is_miss() {
        let backend = MokaBackend::new(100);
        backend.set("k", b"v".to_vec(), Duration::from_millis(20)).unwrap();
        assert_eq!(backend.get("k").unwrap(), Some(b"v".to_vec()));

        thread::sleep(Duration::from_millis(50));
        assert_eq!(backend.get("k").unwrap(), None);
    }

    #[test]
    fn test_overwrite_uses_new_ttl() {
        let backend = MokaBackend::new(100);
        backend.set("k", b"old".to_vec(), Duration::from_millis(10)).unwrap();
        backend.set("k", b"new".to_vec(), Duration::from_secs(60)).unwrap();

        thread::sleep(Duration::from_millis(30));
        assert_eq!(backend.get("k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn test_invalidate_by_pattern() {
        let backend = MokaBackend::new(100);
        let ttl = Duration::from_secs(60);
        backend.set("assessment:a", vec![1], ttl).unwrap();
        backend.set("assessment:b", vec![2], ttl).unwrap();
        backend.set("normative:snr", vec![3], ttl).unwrap();

        let removed = backend
            .invalidate(&KeyPattern::new("assessment:*").unwrap())
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(backend.get("assessment:a").unwrap(), None);
        assert!(backend.get("normative:snr").unwrap().is_some());
        assert!(backend.delete("normative:snr").unwrap());
        assert!(!backend.delete("normative:snr").unwrap());
    }
}
