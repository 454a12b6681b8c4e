use std::sync::Arc;
use std::time::Duration;

use crate::access::{DataAccess, DataAccessConfig};
use crate::cache::{Cache, CacheStore, LocalCache};
use crate::database::{Connector, PoolConfig};

/// Pool sizing for tests: 1 s to acquire, 5 s per statement
///
/// # Panics
/// Panics if `min > max` or either is zero.
pub fn pool_config(min: usize, max: usize) -> PoolConfig {
    PoolConfig::new(min, max, Duration::from_secs(1), Duration::from_secs(5))
        .expect("invalid test pool sizing")
}

/// Returns a cache store over a fresh in-process cache
///
/// Each call returns a new instance, ensuring test isolation.
pub fn cache() -> CacheStore {
    store(LocalCache::new())
}

/// Wrap any backend with a 1 s operation timeout
pub fn store(backend: impl Cache + 'static) -> CacheStore {
    CacheStore::new(Arc::new(backend), Duration::from_secs(1))
}

/// Returns a connected [`DataAccess`] with default settings and a local cache
///
/// # Example
/// ```no_run
/// use prepnexus_data::testing::{setup, MockConnector};
///
/// # async fn example() {
/// let connector = MockConnector::new();
/// let db = setup::data_access(&connector, 1, 2).await;
/// connector.set_failing(true);
/// assert!(db.fetch("SELECT 1", &[], Default::default()).await.is_err());
/// # }
/// ```
///
/// # Panics
/// Panics if the pool cannot be warmed.
pub async fn data_access<C: Connector + Clone>(connector: &C, min: usize, max: usize) -> DataAccess<C> {
    data_access_with(connector, DataAccessConfig::new(pool_config(min, max)), cache()).await
}

/// Like [`data_access`] with explicit settings and cache
///
/// # Panics
/// Panics if the pool cannot be warmed.
pub async fn data_access_with<C: Connector + Clone>(
    connector: &C,
    config: DataAccessConfig,
    cache: CacheStore,
) -> DataAccess<C> {
    DataAccess::connect(connector.clone(), config, cache)
        .await
        .expect("Failed to connect test data access")
}
