//! Data sources for graceful degradation: the per-service last-good response
//! cache and registered fallback providers

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;

/// Where degraded data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackSource {
    /// Last successful response for the service
    Cache,
    /// A registered provider's default data
    Default,
}

impl FallbackSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackSource::Cache => "cache",
            FallbackSource::Default => "default",
        }
    }
}

/// Degraded payload plus its provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackData {
    pub value: Value,
    pub source: FallbackSource,
}

/// Supplies default data for a service when every real attempt failed.
#[async_trait::async_trait]
pub trait FallbackProvider: Send + Sync {
    /// `Ok(None)` means the provider has nothing for this service.
    async fn fallback(&self, service: &str) -> anyhow::Result<Option<Value>>;
}

/// Provider that always returns the same JSON value
#[derive(Debug, Clone)]
pub struct StaticFallback {
    value: Value,
}

impl StaticFallback {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

#[async_trait::async_trait]
impl FallbackProvider for StaticFallback {
    async fn fallback(&self, _service: &str) -> anyhow::Result<Option<Value>> {
        Ok(Some(self.value.clone()))
    }
}

#[derive(Debug)]
struct CachedResponse {
    value: Value,
    stored_at: Instant,
}

/// Bounded LRU of the last successful response per service, with expiry
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<LruCache<String, CachedResponse>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn store(&self, service: &str, value: Value) {
        self.entries.lock().put(
            service.to_string(),
            CachedResponse {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Fresh cached value, if any. Expired entries are dropped on read.
    pub fn get(&self, service: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(service) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(service);
        }
        None
    }

    pub fn invalidate(&self, service: &str) -> bool {
        self.entries.lock().pop(service).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(256, Duration::from_secs(300))
    }
}
