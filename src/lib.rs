//! Resilient relational data access
//!
//! A bounded connection pool, a health-checked circuit breaker and a fail-open
//! query cache behind one facade, [`DataAccess`].

// Re-export all public modules
pub mod access;
pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod metrics;
pub mod resilience;
pub mod router;
pub mod telemetry;

// Testing utilities (always available for integration tests)
pub mod testing;

// Re-export commonly used types for convenience
pub use access::{DataAccess, DataAccessConfig, DataAccessError, FetchOptions, HealthReport};
pub use cache::{Cache, CacheKey, CacheStats, CacheStore, LocalCache, NullCache, RedisCache};
pub use database::{Pool, PoolConfig, PoolError, QueryArg, Row, SeaOrmConnector, StoreError};
pub use metrics::AppMetrics;
pub use resilience::{CircuitBreaker, CircuitState, HealthMonitor, HealthStatus};
