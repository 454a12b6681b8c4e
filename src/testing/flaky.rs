use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::cache::{Cache, CacheStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Failing,
    Hanging,
}

/// Cache backend that is never usable
///
/// `failing()` errors on every call, like a Redis server that refuses
/// connections; `hanging()` never answers, like one that accepted the TCP
/// connection and went silent.
#[derive(Debug, Clone)]
pub struct FlakyCache {
    mode: Mode,
}

impl FlakyCache {
    pub fn failing() -> Self {
        Self { mode: Mode::Failing }
    }

    pub fn hanging() -> Self {
        Self { mode: Mode::Hanging }
    }

    async fn fail<T>(&self) -> Result<T> {
        if self.mode == Mode::Hanging {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Err(anyhow!("cache backend unavailable"))
    }
}

#[async_trait]
impl Cache for FlakyCache {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>> {
        self.fail().await
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        self.fail().await
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        self.fail().await
    }

    async fn delete_pattern(&self, _pattern: &str) -> Result<u64> {
        self.fail().await
    }

    async fn exists(&self, _key: &str) -> Result<bool> {
        self.fail().await
    }

    async fn clear(&self) -> Result<()> {
        self.fail().await
    }

    async fn stats(&self) -> Result<CacheStats> {
        self.fail().await
    }

    async fn ping(&self) -> Result<()> {
        self.fail().await
    }
}
