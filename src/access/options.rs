use std::time::Duration;

use crate::config::{AppConfig, DatabaseConfig, DatabaseIdentity};
use crate::database::{PoolConfig, PoolError};

/// Per-call read options
///
/// Never part of the cache fingerprint: the same query with different options
/// reads and writes the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub use_cache: bool,
    /// `None` uses the configured default TTL
    pub ttl: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            ttl: None,
        }
    }
}

impl FetchOptions {
    /// Always go to the database
    pub fn no_cache() -> Self {
        Self {
            use_cache: false,
            ttl: None,
        }
    }

    /// Cache with an explicit TTL
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            use_cache: true,
            ttl: Some(ttl),
        }
    }
}

/// Everything [`DataAccess`](super::DataAccess) needs besides its collaborators
#[derive(Debug, Clone)]
pub struct DataAccessConfig {
    pub pool: PoolConfig,
    pub default_ttl: Duration,
    pub health_interval: Duration,
    pub breaker_threshold: u32,
    pub single_flight: bool,
    pub auto_invalidate: bool,
    /// Reported by the health endpoint
    pub database: DatabaseIdentity,
}

impl DataAccessConfig {
    /// Defaults around an explicit pool configuration
    pub fn new(pool: PoolConfig) -> Self {
        Self {
            pool,
            default_ttl: Duration::from_secs(300),
            health_interval: Duration::from_secs(60),
            breaker_threshold: 5,
            single_flight: false,
            auto_invalidate: false,
            database: DatabaseConfig::default().identity(),
        }
    }

    pub fn from_app(config: &AppConfig) -> Result<Self, PoolError> {
        Ok(Self {
            pool: PoolConfig::from_database(&config.database)?,
            default_ttl: config.cache.default_ttl(),
            health_interval: config.health.interval(),
            breaker_threshold: config.resilience.circuit_breaker.threshold,
            single_flight: config.cache.single_flight,
            auto_invalidate: config.cache.auto_invalidate,
            database: config.database.identity(),
        })
    }
}
