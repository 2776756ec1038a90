use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::JudgeError;

/// sha256 over the canonical (sorted-key) JSON encoding of a detection
/// bundle (spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_canonical_json(value: &serde_json::Value) -> Self {
        let canonical = canonicalize(value);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Re-encodes `value` with object keys sorted, so two JSON values that
/// differ only in key order hash identically.
fn canonicalize(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let sorted: std::collections::BTreeMap<_, _> =
                    map.iter().map(|(k, v)| (k.clone(), sort(v))).collect();
                serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
            }
            serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: chrono::DateTime<chrono::Utc>,
}

/// TTL-capable keyed cache port (spec §4.4). A production deployment backs
/// this with the shared key-value store; `InMemoryCache` is the default and
/// test implementation.
#[async_trait]
pub trait Cache<V: Clone + Send + Sync>: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<V>, JudgeError>;
    async fn put(&self, key: CacheKey, value: V);
}

struct Slot<V> {
    value: V,
    expires_at: Instant,
}

pub struct InMemoryCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, Slot<V>>>,
}

impl<V: Clone + Send + Sync> InMemoryCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<V: Clone + Send + Sync> Cache<V> for InMemoryCache<V> {
    async fn get(&self, key: &CacheKey) -> Result<Option<V>, JudgeError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(slot) if slot.expires_at > Instant::now() => Ok(Some(slot.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: CacheKey, value: V) {
        self.entries.lock().insert(
            key,
            Slot {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}
