use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use super::{Cache, CacheStats};

/// Cache that never stores anything
///
/// Used when caching is disabled in configuration, and as the fallback when the
/// configured Redis server cannot be reached at start-up. Every read is a miss, so
/// the data-access layer simply goes to the store each time.
///
/// # Example
/// ```
/// use prepnexus_data::cache::{Cache, NullCache};
/// use std::time::Duration;
///
/// # async fn example() -> anyhow::Result<()> {
/// let cache = NullCache::new();
/// cache.set("key", "1", Duration::from_secs(60)).await?;
/// assert_eq!(cache.get("key").await?, None);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct NullCache;

impl NullCache {
    pub fn new() -> Self {
        NullCache
    }
}

impl fmt::Display for NullCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NullCache")
    }
}

#[async_trait]
impl Cache for NullCache {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn delete_pattern(&self, _pattern: &str) -> Result<u64> {
        Ok(0)
    }

    async fn exists(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats::new(self.name()))
    }
}
