use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::error::DataAccessError;
use super::options::{DataAccessConfig, FetchOptions};
use super::report::{CircuitBreakerReport, HealthReport, OverallStatus, PerformanceReport};
use crate::cache::{CacheKey, CacheStats, CacheStore};
use crate::database::{Connection, Connector, Pool, PoolError, PoolSize, QueryArg, Row, StoreError};
use crate::metrics;
use crate::resilience::{CircuitBreaker, HealthMonitor, HealthStatus};

type SharedLoad = Shared<BoxFuture<'static, Result<JsonValue, DataAccessError>>>;

/// What a statement returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Execute,
    Fetch,
    FetchOne,
    FetchScalar,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::Execute => "execute",
            Op::Fetch => "fetch",
            Op::FetchOne => "fetch_one",
            Op::FetchScalar => "fetch_scalar",
        }
    }

    /// Entry for this read shape under the query fingerprint
    fn cache_key(self, sql: &str, args: &[QueryArg]) -> String {
        let fingerprint = CacheKey::query(sql, args);
        match self {
            Op::FetchOne => format!("{fingerprint}:one"),
            Op::FetchScalar => format!("{fingerprint}:scalar"),
            Op::Execute | Op::Fetch => fingerprint,
        }
    }

    async fn run<K: Connection>(self, conn: &mut K, sql: &str, args: &[QueryArg]) -> Result<JsonValue, StoreError> {
        Ok(match self {
            Op::Execute => JsonValue::from(conn.execute(sql, args).await?),
            Op::Fetch => JsonValue::Array(conn.fetch(sql, args).await?.into_iter().map(JsonValue::Object).collect()),
            Op::FetchOne => conn.fetch_one(sql, args).await?.map_or(JsonValue::Null, JsonValue::Object),
            Op::FetchScalar => conn.fetch_scalar(sql, args).await?.unwrap_or(JsonValue::Null),
        })
    }
}

struct Inner<C: Connector> {
    pool: Arc<Pool<C>>,
    cache: CacheStore,
    health: Arc<HealthMonitor<C>>,
    config: DataAccessConfig,
    in_flight: DashMap<String, SharedLoad>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

/// Single entry point to the database
///
/// Reads go breaker → cache → pool → cache; writes go breaker → pool. Cheap to
/// clone; build one at start-up and share it.
pub struct DataAccess<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for DataAccess<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> DataAccess<C> {
    /// Open the pool (warming it to `min_size`) and run a first health probe
    #[tracing::instrument(skip_all)]
    pub async fn connect(connector: C, config: DataAccessConfig, cache: CacheStore) -> Result<Self, PoolError> {
        let pool = Pool::connect(connector, config.pool).await?;
        let access = Self::from_pool(pool, config, cache);

        let status = access.inner.health.probe().await;
        if status.is_healthy {
            tracing::info!(response_time_ms = status.response_time_ms, "Database connection established");
        } else {
            tracing::warn!(
                error = status.last_error.as_deref().unwrap_or_default(),
                "Initial database health check failed"
            );
        }

        Ok(access)
    }

    /// Wrap an existing pool; no probe is run until the first call
    pub fn from_pool(pool: Pool<C>, config: DataAccessConfig, cache: CacheStore) -> Self {
        let pool = Arc::new(pool);
        let breaker = CircuitBreaker::new("database", config.breaker_threshold);
        let health = Arc::new(HealthMonitor::new(Arc::clone(&pool), breaker, config.health_interval));

        Self {
            inner: Arc::new(Inner {
                pool,
                cache,
                health,
                config,
                in_flight: DashMap::new(),
                monitor_task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &DataAccessConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn health(&self) -> &HealthMonitor<C> {
        &self.inner.health
    }

    pub fn pool_size(&self) -> PoolSize {
        self.inner.pool.size()
    }

    /// Run a write; never cached
    #[tracing::instrument(skip_all, fields(sql = %sql))]
    pub async fn execute(&self, sql: &str, args: &[QueryArg]) -> Result<u64, DataAccessError> {
        self.admit().await?;
        let affected = self.run(Op::Execute, sql, args).await?.as_u64().unwrap_or_default();

        if self.inner.config.auto_invalidate {
            if let Some(table) = CacheKey::write_target(sql) {
                self.invalidate(&table).await;
            }
        }

        Ok(affected)
    }

    /// Every row of a query
    #[tracing::instrument(skip_all, fields(sql = %sql))]
    pub async fn fetch(&self, sql: &str, args: &[QueryArg], options: FetchOptions) -> Result<Vec<Row>, DataAccessError> {
        let value = self.read(Op::Fetch, sql, args, options).await?;
        Ok(match value {
            JsonValue::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    JsonValue::Object(row) => Some(row),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        })
    }

    /// First row of a query, if any
    #[tracing::instrument(skip_all, fields(sql = %sql))]
    pub async fn fetch_one(&self, sql: &str, args: &[QueryArg], options: FetchOptions) -> Result<Option<Row>, DataAccessError> {
        Ok(match self.read(Op::FetchOne, sql, args, options).await? {
            JsonValue::Object(row) => Some(row),
            _ => None,
        })
    }

    /// First column of the first row, if any
    #[tracing::instrument(skip_all, fields(sql = %sql))]
    pub async fn fetch_scalar(
        &self,
        sql: &str,
        args: &[QueryArg],
        options: FetchOptions,
    ) -> Result<Option<JsonValue>, DataAccessError> {
        Ok(match self.read(Op::FetchScalar, sql, args, options).await? {
            JsonValue::Null => None,
            value => Some(value),
        })
    }

    /// Drop cached reads of `resource` (e.g. `"blogs"` clears `db:*blogs*`)
    pub async fn invalidate(&self, resource: &str) -> u64 {
        let removed = self
            .inner
            .cache
            .delete_pattern(&CacheKey::resource_pattern(resource))
            .await;
        tracing::info!(resource, removed, "Cache invalidated");
        removed
    }

    /// Drop every cached query result
    pub async fn clear_cache(&self) -> u64 {
        let removed = self.inner.cache.delete_pattern(&CacheKey::all()).await;
        tracing::info!(removed, "Query cache cleared");
        removed
    }

    pub async fn cache_stats(&self) -> Option<CacheStats> {
        self.inner.cache.stats().await
    }

    /// Snapshot of the monitor's status, without probing
    pub fn health_status(&self) -> HealthStatus {
        self.inner.health.status()
    }

    /// Probe the database and report on it, the pool, the cache and the breaker
    pub async fn health_report(&self) -> HealthReport {
        let status = self.inner.health.probe().await;
        let cache_available = self.inner.cache.is_available().await;
        let breaker = self.inner.health.breaker();
        let size = self.pool_size();
        metrics::set_pool_connections(size);

        HealthReport {
            status: if status.is_healthy && !breaker.is_open() {
                OverallStatus::Healthy
            } else {
                OverallStatus::Unhealthy
            },
            database: self.inner.config.database.clone(),
            performance: PerformanceReport {
                response_time_ms: status.response_time_ms,
                active_connections: size.active,
                total_connections: size.total,
                cache_available,
            },
            circuit_breaker: CircuitBreakerReport {
                open: breaker.is_open(),
                error_count: status.consecutive_error_count,
                threshold: breaker.threshold(),
            },
            last_check: status.last_check,
            last_error: status.last_error,
        }
    }

    /// Start the background health probe loop; calling it again is a no-op
    pub fn start_health_monitor(&self) {
        let mut task = self.inner.monitor_task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *task = Some(self.inner.health.spawn());
    }

    /// Stop the monitor and close the pool
    pub async fn close(&self) {
        let task = self
            .inner
            .monitor_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = task {
            handle.abort();
        }

        self.inner.pool.close().await;
    }

    /// Probe if stale, then consult the breaker
    async fn admit(&self) -> Result<(), DataAccessError> {
        self.inner.health.probe_if_stale().await;
        self.inner.health.breaker().check()?;
        Ok(())
    }

    async fn read(&self, op: Op, sql: &str, args: &[QueryArg], options: FetchOptions) -> Result<JsonValue, DataAccessError> {
        self.admit().await?;

        if !options.use_cache || !CacheKey::is_read_only(sql) {
            return self.run(op, sql, args).await;
        }

        let key = op.cache_key(sql, args);
        if let Some(hit) = self.inner.cache.get::<JsonValue>(&key).await {
            return Ok(hit);
        }

        let ttl = options.ttl.unwrap_or(self.inner.config.default_ttl);
        if self.inner.config.single_flight {
            self.load_shared(op, sql, args, key, ttl).await
        } else {
            self.load(op, sql, args, &key, ttl).await
        }
    }

    /// Run a read and populate the cache
    async fn load(&self, op: Op, sql: &str, args: &[QueryArg], key: &str, ttl: Duration) -> Result<JsonValue, DataAccessError> {
        let value = self.run(op, sql, args).await?;
        self.inner.cache.set(key, &value, ttl).await;
        Ok(value)
    }

    /// Like `load`, but concurrent misses on one key share a single round trip
    async fn load_shared(
        &self,
        op: Op,
        sql: &str,
        args: &[QueryArg],
        key: String,
        ttl: Duration,
    ) -> Result<JsonValue, DataAccessError> {
        let shared = match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                tracing::debug!(cache_key = %key, "Joining in-flight load");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let this = self.clone();
                let (sql, args, load_key) = (sql.to_string(), args.to_vec(), key.clone());
                let load = async move { this.load(op, &sql, &args, &load_key, ttl).await }
                    .boxed()
                    .shared();
                entry.insert(load.clone());
                load
            }
        };

        let result = shared.clone().await;
        self.inner.in_flight.remove_if(&key, |_, current| current.ptr_eq(&shared));
        result
    }

    /// Check out a connection, run `op` under the command timeout, record the outcome
    async fn run(&self, op: Op, sql: &str, args: &[QueryArg]) -> Result<JsonValue, DataAccessError> {
        let started = Instant::now();
        let result = self.run_pooled(op, sql, args).await;
        let elapsed = started.elapsed();

        metrics::record_db_query(op.name(), result.is_ok(), elapsed);
        metrics::set_pool_connections(self.inner.pool.size());

        match &result {
            Ok(_) => self.inner.health.record_success(),
            Err(e) if e.counts_against_breaker() => {
                tracing::error!(operation = op.name(), error = %e, elapsed_ms = elapsed.as_millis() as u64, "Database operation failed");
                self.inner.health.record_failure(&e.to_string());
            }
            Err(e) => tracing::warn!(operation = op.name(), error = %e, "Database operation rejected"),
        }

        result
    }

    async fn run_pooled(&self, op: Op, sql: &str, args: &[QueryArg]) -> Result<JsonValue, DataAccessError> {
        let mut conn = self.inner.pool.acquire().await?;

        let limit = self.inner.pool.config().command_timeout();
        let result = match timeout(limit, op.run(&mut *conn, sql, args)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(limit.as_millis() as u64)),
        };

        if let Err(e) = &result {
            if e.breaks_connection() {
                conn.mark_broken();
            }
        }

        Ok(result?)
    }
}

impl<C: Connector> std::fmt::Debug for DataAccess<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataAccess")
            .field("pool", &self.inner.pool)
            .field("cache", &self.inner.cache.backend_name())
            .field("health", &self.inner.health)
            .finish_non_exhaustive()
    }
}
