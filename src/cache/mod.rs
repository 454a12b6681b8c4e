//! Query result caching
//!
//! Backends implement [`Cache`] over already-encoded JSON text. Callers go through
//! [`CacheStore`], which owns encoding and turns every backend failure into a miss.

pub mod key;
pub mod local;
pub mod null;
pub mod redis;
pub mod store;

pub use key::CacheKey;
pub use local::LocalCache;
pub use null::NullCache;
pub use redis::RedisCache;
pub use store::CacheStore;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

/// Key/value cache backend storing JSON text with a TTL
#[async_trait]
pub trait Cache: Send + Sync + Debug {
    /// Short backend name used in logs and stats
    fn name(&self) -> &'static str;

    /// Get a value from the cache
    ///
    /// Returns None if the key doesn't exist or has expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value that expires after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key matching a glob (`*`, `?`, `[...]`), returning the count
    async fn delete_pattern(&self, pattern: &str) -> Result<u64>;

    /// Check if a key exists in the cache
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Clear all keys owned by this cache
    async fn clear(&self) -> Result<()>;

    /// Get cache statistics
    async fn stats(&self) -> Result<CacheStats>;

    /// Check the backend is reachable
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Statistics about cache performance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Backend that produced these numbers
    pub backend: String,

    /// Total number of cache hits (successful gets)
    pub hits: u64,

    /// Total number of cache misses (failed gets)
    pub misses: u64,

    /// Total number of values written
    pub sets: u64,

    /// Total number of entries removed by delete, pattern delete, clear or expiry
    pub evictions: u64,

    /// Current number of items in the cache
    pub size: usize,

    /// Hit rate as a fraction (0.0 to 1.0)
    pub hit_rate: f64,
}

impl CacheStats {
    /// Create new cache stats with zero values
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            hits: 0,
            misses: 0,
            sets: 0,
            evictions: 0,
            size: 0,
            hit_rate: 0.0,
        }
    }

    /// Calculate hit rate from hits and misses
    pub fn calculate_hit_rate(&mut self) {
        let total = self.hits + self.misses;
        self.hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };
    }
}
