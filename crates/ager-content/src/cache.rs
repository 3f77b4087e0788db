//! Process-local deduplication cache.
//!
//! Remembers the fingerprint of the last accepted wellness payload per
//! `(bucket, age)` so a repeated generation can be detected and retried.
//! There is no eviction: buckets and ages are low-cardinality, so the map
//! stays small. Each process has its own cache; instances do not share one.

use ager_core::{age_key, AgeBucket};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    bucket: AgeBucket,
    age: String,
}

impl CacheKey {
    pub fn new(bucket: AgeBucket, age: f64) -> Self {
        Self {
            bucket,
            age: age_key(age),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct DedupCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `fingerprint` equals the last one recorded for `key`.
    pub fn is_repeat(&self, key: &CacheKey, fingerprint: &str) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|entry| entry.fingerprint == fingerprint)
    }

    /// Record an accepted payload. Last writer wins.
    pub fn record(&self, key: CacheKey, fingerprint: String) {
        self.entries.lock().insert(
            key,
            CacheEntry {
                fingerprint,
                recorded_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// SHA-256 over the canonical (key-sorted, compact) JSON encoding.
pub fn fingerprint(value: &Value) -> String {
    let canonical = canonicalize(value).to_string();
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": "s"}});
        let b = json!({"a": {"x": "s", "y": [1, 2]}, "b": 1});
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 64);
    }

    #[test]
    fn test_fingerprint_sensitive_to_content() {
        assert_ne!(fingerprint(&json!({"a": 1})), fingerprint(&json!({"a": 2})));
        assert_ne!(fingerprint(&json!([1, 2])), fingerprint(&json!([2, 1])));
    }

    #[test]
    fn test_repeat_detection_per_key() {
        let cache = DedupCache::new();
        let senior = CacheKey::new(AgeBucket::Senior, 70.0);
        let other = CacheKey::new(AgeBucket::Senior, 71.0);

        assert!(!cache.is_repeat(&senior, "abc"));
        cache.record(senior.clone(), "abc".into());
        assert!(cache.is_repeat(&senior, "abc"));
        assert!(!cache.is_repeat(&senior, "def"));
        assert!(!cache.is_repeat(&other, "abc"));

        // 70 and 70.0 share a key.
        assert!(cache.is_repeat(&CacheKey::new(AgeBucket::Senior, 70.0), "abc"));
    }

    #[test]
    fn test_record_overwrites() {
        let cache = DedupCache::new();
        let key = CacheKey::new(AgeBucket::Teen, 15.0);
        cache.record(key.clone(), "first".into());
        cache.record(key.clone(), "second".into());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key).unwrap().fingerprint, "second");
    }
}
