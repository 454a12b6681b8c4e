use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use super::{Cache, CacheStats};
use crate::config::CacheConfig;

/// Redis-backed cache
///
/// - Async operations using redis::aio::ConnectionManager (reconnects on its own)
/// - Key prefixing for namespace isolation
/// - JSON text values with TTL via SET EX
/// - Pattern deletes via KEYS + DEL
#[derive(Clone)]
pub struct RedisCache {
    conn_manager: ConnectionManager,
    /// Key prefix for namespace isolation (e.g., "prepnexus:")
    prefix: String,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    sets: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
}

impl RedisCache {
    /// Connect with a default timeout of 5 seconds
    ///
    /// # Example
    /// ```no_run
    /// use prepnexus_data::cache::RedisCache;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let cache = RedisCache::new("redis://localhost:6379", "prepnexus").await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(url: &str, prefix: &str) -> Result<Self> {
        Self::with_timeout(url, prefix, Duration::from_secs(5)).await
    }

    pub async fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::with_timeout(&config.redis_url, &config.prefix, config.operation_timeout()).await
    }

    /// Connect, failing if the server does not answer within `connection_timeout`
    pub async fn with_timeout(url: &str, prefix: &str, connection_timeout: Duration) -> Result<Self> {
        let client = Client::open(url).context("Failed to create Redis client")?;

        let conn_manager = timeout(connection_timeout, ConnectionManager::new(client))
            .await
            .with_context(|| {
                format!(
                    "Redis connection timeout after {:?}. Check Redis is running at: {}",
                    connection_timeout, url
                )
            })?
            .context("Failed to create Redis connection manager")?;

        Ok(Self {
            conn_manager,
            prefix: format!("{}:", prefix),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sets: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
        })
    }

    fn build_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn connection(&self) -> ConnectionManager {
        self.conn_manager.clone()
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection();
        conn.keys(self.build_key(pattern))
            .await
            .context("Failed to list keys from Redis")
    }

    async fn delete_keys(&self, keys: Vec<String>) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection();
        let deleted: u64 = conn.del(keys).await.context("Failed to delete keys from Redis")?;
        self.evictions.fetch_add(deleted, Ordering::Relaxed);
        Ok(deleted)
    }
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("prefix", &self.prefix)
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Cache for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    #[tracing::instrument(skip(self), fields(cache_key = %key))]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection();

        let value: Option<String> = conn
            .get(self.build_key(key))
            .await
            .context("Failed to get value from Redis")?;

        let counter = if value.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);

        Ok(value)
    }

    #[tracing::instrument(skip(self, value), fields(cache_key = %key, ttl_secs = ttl.as_secs()))]
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection();

        // SET EX rejects a zero expiry
        let ttl_secs = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(self.build_key(key), value, ttl_secs)
            .await
            .context("Failed to set value in Redis")?;

        self.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(cache_key = %key))]
    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.delete_keys(vec![self.build_key(key)]).await? > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let keys = self.keys_matching(pattern).await?;
        let deleted = self.delete_keys(keys).await?;
        tracing::debug!(deleted, "Cache pattern deleted");
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection();
        conn.exists(self.build_key(key))
            .await
            .context("Failed to check if key exists in Redis")
    }

    #[tracing::instrument(skip(self))]
    async fn clear(&self) -> Result<()> {
        let keys = self.keys_matching("*").await?;
        let cleared = self.delete_keys(keys).await?;
        tracing::info!(cleared_entries = cleared, "Cache cleared");
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let size = self.keys_matching("*").await?.len();

        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size,
            ..CacheStats::new(self.name())
        };
        stats.calculate_hit_rate();
        Ok(stats)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis did not answer PING")?;
        Ok(())
    }
}
