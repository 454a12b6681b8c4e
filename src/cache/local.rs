use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use globset::{Glob, GlobMatcher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{Cache, CacheStats};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
}

/// In-process cache using DashMap
///
/// Single-node stand-in for Redis. Expired entries are dropped lazily on read and
/// by a background sweep every minute.
#[derive(Debug)]
pub struct LocalCache {
    store: Arc<DashMap<String, Entry>>,
    counters: Arc<Counters>,
    sweeper: Option<JoinHandle<()>>,
}

impl LocalCache {
    /// Create a new LocalCache with default shard count (CPU count * 4)
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new() -> Self {
        Self::with_shard_count((num_cpus::get() * 4).next_power_of_two())
    }

    /// Create a new LocalCache with a specific shard count (a power of two)
    pub fn with_shard_count(shard_count: usize) -> Self {
        let store = Arc::new(DashMap::with_shard_amount(shard_count));
        let counters = Arc::new(Counters::default());
        let sweeper = Self::spawn_sweeper(Arc::clone(&store), Arc::clone(&counters));

        Self {
            store,
            counters,
            sweeper: Some(sweeper),
        }
    }

    fn spawn_sweeper(store: Arc<DashMap<String, Entry>>, counters: Arc<Counters>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;

            loop {
                interval.tick().await;

                let now = Instant::now();
                let before = store.len();
                store.retain(|_, entry| !entry.is_expired(now));
                let swept = before.saturating_sub(store.len());

                if swept > 0 {
                    counters.evictions.fetch_add(swept as u64, Ordering::Relaxed);
                    tracing::debug!(swept, "Expired cache entries removed");
                }
            }
        })
    }

    fn live_entry(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let expired = match self.store.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        if expired && self.store.remove_if(key, |_, entry| entry.is_expired(now)).is_some() {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
        None
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LocalCache {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Cache for LocalCache {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self.live_entry(key);
        let counter = if value.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.store.insert(key.to_string(), entry);
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.store.remove(key).is_some();
        if removed {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let matcher: GlobMatcher = Glob::new(pattern)
            .with_context(|| format!("Invalid cache key pattern: {pattern}"))?
            .compile_matcher();

        let before = self.store.len();
        self.store.retain(|key, _| !matcher.is_match(key));
        let removed = before.saturating_sub(self.store.len()) as u64;

        self.counters.evictions.fetch_add(removed, Ordering::Relaxed);
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live_entry(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        let cleared = self.store.len() as u64;
        self.store.clear();
        self.counters.evictions.fetch_add(cleared, Ordering::Relaxed);
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            size: self.store.len(),
            ..CacheStats::new(self.name())
        };
        stats.calculate_hit_rate();
        Ok(stats)
    }
}
