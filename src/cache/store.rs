//! Fail-open cache facade
//!
//! Nothing in here returns an error. A backend that is down, slow or holding
//! undecodable data behaves like an empty cache, and the caller falls through to
//! the database.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::timeout;

use super::{Cache, CacheStats, NullCache};
use crate::config::CacheConfig;
use crate::metrics;

/// Best-effort JSON cache over any [`Cache`] backend
#[derive(Debug, Clone)]
pub struct CacheStore {
    backend: Arc<dyn Cache>,
    op_timeout: Duration,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn Cache>, op_timeout: Duration) -> Self {
        Self { backend, op_timeout }
    }

    pub fn from_config(backend: Arc<dyn Cache>, config: &CacheConfig) -> Self {
        Self::new(backend, config.operation_timeout())
    }

    /// Store that caches nothing
    pub fn disabled() -> Self {
        Self::new(Arc::new(NullCache::new()), Duration::from_secs(5))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Look a value up; any failure reads as a miss
    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        let raw = match self.bounded("get", self.backend.get(key)).await {
            Some(Some(raw)) => raw,
            Some(None) => {
                tracing::debug!(cache_key = %key, "Cache miss");
                metrics::record_cache_miss();
                return None;
            }
            None => return None,
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                tracing::debug!(cache_key = %key, "Cache hit");
                metrics::record_cache_hit();
                Some(value)
            }
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "Cached value could not be decoded, treating as miss");
                metrics::record_cache_error("decode");
                None
            }
        }
    }

    /// Encode and store a value; returns whether it was stored
    pub async fn set<V: Serialize + ?Sized>(&self, key: &str, value: &V, ttl: Duration) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(cache_key = %key, error = %e, "Value cannot be encoded for the cache, not stored");
                metrics::record_cache_error("encode");
                return false;
            }
        };

        self.bounded("set", self.backend.set(key, &raw, ttl)).await.is_some()
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.bounded("delete", self.backend.delete(key))
            .await
            .unwrap_or(false)
    }

    /// Remove every key matching `pattern`; 0 when the backend fails
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        let deleted = self
            .bounded("delete_pattern", self.backend.delete_pattern(pattern))
            .await
            .unwrap_or(0);
        tracing::debug!(pattern, deleted, "Cache entries invalidated");
        deleted
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.bounded("exists", self.backend.exists(key))
            .await
            .unwrap_or(false)
    }

    pub async fn clear(&self) -> bool {
        self.bounded("clear", self.backend.clear()).await.is_some()
    }

    pub async fn stats(&self) -> Option<CacheStats> {
        self.bounded("stats", self.backend.stats()).await
    }

    /// Whether the backend answers a ping within the operation timeout
    pub async fn is_available(&self) -> bool {
        self.bounded("ping", self.backend.ping()).await.is_some()
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> Option<T> {
        match timeout(self.op_timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    op,
                    error = %format!("{e:#}"),
                    "Cache operation failed"
                );
                metrics::record_cache_error(op);
                None
            }
            Err(_) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    op,
                    timeout_ms = self.op_timeout.as_millis() as u64,
                    "Cache operation timed out"
                );
                metrics::record_cache_error(op);
                None
            }
        }
    }
}
