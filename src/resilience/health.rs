//! Database health monitoring
//!
//! The monitor is the only writer of [`HealthStatus`] and of the circuit breaker.
//! Probes run periodically from a background task and on demand when the last
//! result has gone stale; everyone else reads cloned snapshots.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use super::circuit_breaker::CircuitBreaker;
use crate::database::{Connection, Connector, Pool, PoolError, StoreError};
use crate::metrics;

/// Outcome of the most recent health probe plus the running failure count
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub is_healthy: bool,
    /// When the last probe finished; `None` until the first probe
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_error_count: u32,
    pub last_error: Option<String>,
    pub response_time_ms: f64,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            is_healthy: false,
            last_check: None,
            consecutive_error_count: 0,
            last_error: None,
            response_time_ms: 0.0,
        }
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    status: HealthStatus,
    checked_at: Option<Instant>,
}

/// Probes the store through the pool and drives the circuit breaker
pub struct HealthMonitor<C: Connector> {
    pool: Arc<Pool<C>>,
    breaker: CircuitBreaker,
    interval: Duration,
    state: Mutex<MonitorState>,
    probe_lock: tokio::sync::Mutex<()>,
}

impl<C: Connector> HealthMonitor<C> {
    pub fn new(pool: Arc<Pool<C>>, breaker: CircuitBreaker, interval: Duration) -> Self {
        Self {
            pool,
            breaker,
            interval,
            state: Mutex::new(MonitorState::default()),
            probe_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Snapshot of the current status
    pub fn status(&self) -> HealthStatus {
        self.lock_state().status.clone()
    }

    /// True before the first probe and once the last one is older than the interval
    pub fn is_stale(&self) -> bool {
        match self.lock_state().checked_at {
            Some(at) => at.elapsed() > self.interval,
            None => true,
        }
    }

    /// Run a probe now
    ///
    /// Concurrent callers queue behind the probe already running.
    #[tracing::instrument(skip(self))]
    pub async fn probe(&self) -> HealthStatus {
        let _probing = self.probe_lock.lock().await;
        self.run_probe().await
    }

    /// Probe only if the status is stale
    ///
    /// Returns the new status when a probe ran. Staleness is re-checked after
    /// waiting for an in-flight probe, so a burst of callers triggers one probe.
    pub async fn probe_if_stale(&self) -> Option<HealthStatus> {
        if !self.is_stale() {
            return None;
        }

        let _probing = self.probe_lock.lock().await;
        if !self.is_stale() {
            return None;
        }
        Some(self.run_probe().await)
    }

    /// Record a successful store call
    pub fn record_success(&self) {
        self.breaker.record_success();
        self.lock_state().status.consecutive_error_count = self.breaker.consecutive_failures();
    }

    /// Record a failed store call against the breaker
    pub fn record_failure(&self, error: &str) {
        self.breaker.record_failure();

        let mut state = self.lock_state();
        state.status.consecutive_error_count = self.breaker.consecutive_failures();
        state.status.last_error = Some(error.to_string());
    }

    /// Start the periodic probe loop
    ///
    /// Sleeps one interval, probes, repeats until the handle is aborted. A panic
    /// inside an iteration is logged and the loop carries on.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            tracing::info!(
                interval_secs = monitor.interval.as_secs(),
                "Database health monitor started"
            );

            loop {
                tokio::time::sleep(monitor.interval).await;

                if monitor.pool.is_closed() {
                    tracing::info!("Database pool closed, stopping health monitor");
                    break;
                }

                match AssertUnwindSafe(monitor.probe()).catch_unwind().await {
                    Ok(status) if !status.is_healthy => tracing::warn!(
                        error = status.last_error.as_deref().unwrap_or_default(),
                        consecutive_errors = status.consecutive_error_count,
                        "Database health check failed"
                    ),
                    Ok(_) => {}
                    Err(panic) => {
                        let reason = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        tracing::error!(reason = %reason, "Health probe panicked, monitor continues");
                    }
                }
            }
        })
    }

    async fn run_probe(&self) -> HealthStatus {
        let started = Instant::now();
        let outcome = self.round_trip().await;
        let elapsed = started.elapsed();

        metrics::record_health_probe(outcome.is_ok(), elapsed);

        match &outcome {
            Ok(()) => self.breaker.close(),
            Err(ProbeFailure::Store(_)) => {
                self.breaker.record_failure();
            }
            Err(ProbeFailure::PoolClosed) => {}
        }

        let mut state = self.lock_state();
        state.checked_at = Some(Instant::now());

        let status = &mut state.status;
        status.is_healthy = outcome.is_ok();
        status.last_check = Some(Utc::now());
        status.response_time_ms = elapsed.as_secs_f64() * 1000.0;
        status.consecutive_error_count = self.breaker.consecutive_failures();

        match outcome {
            Ok(()) => tracing::debug!(response_time_ms = status.response_time_ms, "Database healthy"),
            Err(failure) => status.last_error = Some(failure.to_string()),
        }

        status.clone()
    }

    async fn round_trip(&self) -> Result<(), ProbeFailure> {
        let mut conn = self.pool.acquire().await.map_err(|e| match e {
            PoolError::Closed => ProbeFailure::PoolClosed,
            other => ProbeFailure::Store(other.to_string()),
        })?;

        let limit = self.pool.config().command_timeout();
        let result = match timeout(limit, conn.ping()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(limit.as_millis() as u64)),
        };

        result.map_err(|e| {
            if e.breaks_connection() {
                conn.mark_broken();
            }
            ProbeFailure::Store(e.to_string())
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Connector> std::fmt::Debug for HealthMonitor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("interval", &self.interval)
            .field("breaker", &self.breaker)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum ProbeFailure {
    Store(String),
    PoolClosed,
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeFailure::Store(reason) => write!(f, "{}", reason),
            ProbeFailure::PoolClosed => write!(f, "{}", PoolError::Closed),
        }
    }
}
