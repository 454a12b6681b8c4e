use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ConfigError, Validate, WithDefaults};

/// Which cache backend sits behind the query cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Network-attached Redis
    Redis,
    /// In-process map, single node only
    Local,
    /// Caching disabled
    None,
}

/// Query cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_backend")]
    pub backend: CacheBackendKind,
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Namespace prepended to every Redis key
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Default TTL in seconds for cached query results
    #[serde(default = "default_ttl")]
    pub default_ttl: u64,
    /// Seconds a single cache operation may take before it is treated as a miss
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout: u64,
    /// Let concurrent misses on one fingerprint share a single store round trip
    #[serde(default)]
    pub single_flight: bool,
    /// Invalidate cached reads of the tables an INSERT/UPDATE/DELETE touches
    #[serde(default)]
    pub auto_invalidate: bool,
}

fn default_backend() -> CacheBackendKind {
    CacheBackendKind::Redis
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_prefix() -> String {
    "prepnexus".to_string()
}

fn default_ttl() -> u64 {
    300 // 5 minutes
}

fn default_operation_timeout() -> u64 {
    5
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            prefix: default_prefix(),
            default_ttl: default_ttl(),
            operation_timeout: default_operation_timeout(),
            single_flight: false,
            auto_invalidate: false,
        }
    }
}

impl Validate for CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl == 0 {
            return Err(ConfigError::ValidationError("cache.default_ttl must be > 0".to_string()));
        }
        if self.operation_timeout == 0 {
            return Err(ConfigError::ValidationError("cache.operation_timeout must be > 0".to_string()));
        }
        if self.backend == CacheBackendKind::Redis && self.redis_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "cache.redis_url cannot be empty when backend is redis".to_string(),
            ));
        }
        Ok(())
    }
}

impl WithDefaults for CacheConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}
