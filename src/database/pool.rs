//! Bounded connection pool
//!
//! A counting semaphore with `max_size` permits gates checkout, so no more than
//! `max_size` connections are ever lent out at once. Idle connections are kept on a
//! free list; when it is empty a new physical connection is opened. Connections
//! are not pinged on acquire: a statement that fails with a connection-level error
//! marks its connection broken and the pool discards it on release. The
//! replacement is opened lazily by a later acquire.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use prepnexus_data::database::{Pool, PoolConfig};
//! use prepnexus_data::testing::MockConnector;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PoolConfig::new(1, 4, Duration::from_secs(5), Duration::from_secs(30))?;
//! let pool = Arc::new(Pool::connect(MockConnector::new(), config).await?);
//!
//! let conn = pool.acquire().await?;
//! // ... use the connection ...
//! pool.release(conn);
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use super::connection::{Connection, Connector, StoreError};
use crate::config::DatabaseConfig;

/// Pool error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// No connection became free within the acquire timeout
    #[error("Timed out after {0:?} waiting for a database connection")]
    Timeout(Duration),

    /// The pool has been shut down
    #[error("Connection pool is closed")]
    Closed,

    /// A new physical connection could not be opened
    #[error("Failed to open database connection: {0}")]
    Connect(#[source] StoreError),

    /// Rejected pool configuration
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Immutable pool sizing and timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    min_size: usize,
    max_size: usize,
    acquire_timeout: Duration,
    command_timeout: Duration,
}

impl PoolConfig {
    /// Both sizes must be positive and `min_size <= max_size`
    pub fn new(
        min_size: usize,
        max_size: usize,
        acquire_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, PoolError> {
        if min_size == 0 || max_size == 0 {
            return Err(PoolError::InvalidConfig("pool sizes must be > 0".to_string()));
        }
        if min_size > max_size {
            return Err(PoolError::InvalidConfig(format!(
                "min_size ({}) must be <= max_size ({})",
                min_size, max_size
            )));
        }
        Ok(Self {
            min_size,
            max_size,
            acquire_timeout,
            command_timeout,
        })
    }

    pub fn from_database(config: &DatabaseConfig) -> Result<Self, PoolError> {
        Self::new(
            config.min_connections as usize,
            config.max_connections as usize,
            config.acquire_timeout(),
            config.command_timeout(),
        )
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }
}

/// Advisory snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolSize {
    /// Connections currently checked out
    pub active: usize,
    /// Connections waiting on the free list
    pub idle: usize,
    /// Open physical connections
    pub total: usize,
}

/// Bounded pool of store connections
pub struct Pool<C: Connector> {
    connector: C,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<C::Connection>>,
    total: AtomicUsize,
    active: AtomicUsize,
    closed: AtomicBool,
}

impl<C: Connector> Pool<C> {
    /// Create an empty pool; connections are opened on demand
    pub fn new(connector: C, config: PoolConfig) -> Self {
        Self {
            connector,
            permits: Arc::new(Semaphore::new(config.max_size)),
            idle: Mutex::new(VecDeque::with_capacity(config.max_size)),
            total: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            config,
        }
    }

    /// Create a pool and open `min_size` connections up front
    #[tracing::instrument(skip(connector), fields(min_size = config.min_size, max_size = config.max_size))]
    pub async fn connect(connector: C, config: PoolConfig) -> Result<Self, PoolError> {
        let pool = Self::new(connector, config);

        for _ in 0..config.min_size {
            let conn = pool.open().await?;
            pool.idle_list().push_back(conn);
        }

        tracing::info!(
            connections = config.min_size,
            "Database connection pool initialized"
        );

        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Check out a connection, waiting at most the configured acquire timeout
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection<C>, PoolError> {
        self.acquire_timeout(self.config.acquire_timeout).await
    }

    /// Check out a connection, waiting at most `wait`
    ///
    /// Callers already queued when [`Pool::close`] starts are still served; only
    /// calls made after that fail with [`PoolError::Closed`].
    pub async fn acquire_timeout(
        self: &Arc<Self>,
        wait: Duration,
    ) -> Result<PooledConnection<C>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let permit = match timeout(wait, Arc::clone(&self.permits).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                tracing::warn!(
                    wait_ms = wait.as_millis() as u64,
                    active = self.active.load(Ordering::Relaxed),
                    max_size = self.config.max_size,
                    "Timed out waiting for a database connection"
                );
                return Err(PoolError::Timeout(wait));
            }
        };

        let idle = self.idle_list().pop_front();
        let conn = match idle {
            Some(conn) => conn,
            None => match timeout(wait, self.open()).await {
                Ok(result) => result?,
                Err(_) => return Err(PoolError::Timeout(wait)),
            },
        };

        self.active.fetch_add(1, Ordering::Relaxed);

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            broken: false,
            _permit: permit,
        })
    }

    /// Return a connection to the pool
    ///
    /// Equivalent to dropping the handle.
    pub fn release(&self, conn: PooledConnection<C>) {
        drop(conn);
    }

    pub fn size(&self) -> PoolSize {
        PoolSize {
            active: self.active.load(Ordering::Relaxed),
            idle: self.idle_list().len(),
            total: self.total.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shut the pool down
    ///
    /// New acquisitions fail immediately. Acquirers already waiting are allowed to
    /// finish, bounded by the acquire timeout; then every idle connection is
    /// closed. Connections still checked out after that are discarded on release.
    #[tracing::instrument(skip(self))]
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::info!(active = self.active.load(Ordering::Relaxed), "Closing database connection pool");

        let max = self.config.max_size as u32;
        match timeout(self.config.acquire_timeout, self.permits.acquire_many(max)).await {
            Ok(Ok(_all)) => tracing::debug!("All connections returned to the pool"),
            Ok(Err(_)) => {}
            Err(_) => tracing::warn!(
                still_active = self.active.load(Ordering::Relaxed),
                "Pool drain timed out, in-use connections will be discarded on release"
            ),
        }
        self.permits.close();

        let drained: Vec<C::Connection> = self.idle_list().drain(..).collect();
        for conn in drained {
            self.total.fetch_sub(1, Ordering::Relaxed);
            if let Err(e) = conn.close().await {
                tracing::warn!(error = %e, "Error while closing database connection");
            }
        }

        tracing::info!("Database connection pool closed");
    }

    async fn open(&self) -> Result<C::Connection, PoolError> {
        let conn = self.connector.connect().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to open database connection");
            PoolError::Connect(e)
        })?;
        let total = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(total, "Opened database connection");
        Ok(conn)
    }

    fn check_in(&self, conn: C::Connection, broken: bool) {
        self.active.fetch_sub(1, Ordering::Relaxed);

        if broken || self.is_closed() {
            self.total.fetch_sub(1, Ordering::Relaxed);
            if broken {
                tracing::warn!("Discarding broken database connection");
            }
            drop(conn);
            return;
        }

        self.idle_list().push_back(conn);
    }

    fn idle_list(&self) -> std::sync::MutexGuard<'_, VecDeque<C::Connection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Connector> std::fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.config)
            .field("size", &self.size())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Exclusive handle to a checked-out connection
///
/// Dereferences to the underlying [`Connection`]. Dropping it returns the
/// connection to the pool, or discards it when marked broken.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    pool: Arc<Pool<C>>,
    broken: bool,
    // Released after `Drop::drop` has put the connection back on the free list
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PooledConnection<C> {
    /// Discard this connection instead of returning it to the pool
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.check_in(conn, self.broken);
        }
    }
}
