//! Binary circuit breaker
//!
//! ```text
//! ┌─────────┐  threshold consecutive failures  ┌─────────┐
//! │ Closed  │ ────────────────────────────────► │  Open   │
//! │ (Normal)│ ◄──────────────────────────────── │(Failing)│
//! └─────────┘      successful health probe      └─────────┘
//! ```
//!
//! There is no half-open trial state: while Open every call is rejected, and only
//! a successful probe of the store closes the circuit again.
//!
//! # Example
//!
//! ```rust
//! use prepnexus_data::resilience::{CircuitBreaker, CircuitState};
//!
//! let cb = CircuitBreaker::new("database", 2);
//! cb.record_failure();
//! cb.record_failure();
//! assert!(cb.is_open());
//! assert!(cb.check().is_err());
//!
//! cb.close();
//! assert_eq!(cb.state(), CircuitState::Closed);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::config::CircuitBreakerConfig;
use crate::metrics;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    /// Normal operation, allowing all requests through
    Closed,
    /// Failing state, rejecting all requests until a probe succeeds
    Open,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
        }
    }
}

/// Circuit breaker error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError {
    /// Circuit is open, rejecting requests
    #[error("Circuit breaker is open for {name}")]
    Open { name: String },
}

#[derive(Debug, Default)]
struct CircuitBreakerStats {
    consecutive_failures: AtomicU32,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

/// Thread-safe binary circuit breaker
///
/// Clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    state: Arc<Mutex<CircuitState>>,
    stats: Arc<CircuitBreakerStats>,
}

impl CircuitBreaker {
    /// A threshold of zero is treated as one
    pub fn new(name: impl Into<String>, threshold: u32) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            state: Arc::new(Mutex::new(CircuitState::Closed)),
            stats: Arc::new(CircuitBreakerStats::default()),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self::new(name, config.threshold)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn state(&self) -> CircuitState {
        *self.lock_state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Consecutive failures, never above the threshold
    pub fn consecutive_failures(&self) -> u32 {
        self.stats.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn total_failures(&self) -> u64 {
        self.stats.total_failures.load(Ordering::Relaxed)
    }

    /// Calls turned away while Open
    pub fn total_rejections(&self) -> u64 {
        self.stats.total_rejections.load(Ordering::Relaxed)
    }

    /// Failure rate over recorded outcomes (0.0 to 1.0)
    pub fn failure_rate(&self) -> f64 {
        let failures = self.total_failures();
        let total = failures + self.stats.total_successes.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        failures as f64 / total as f64
    }

    /// Let a call through, or reject it while Open
    pub fn check(&self) -> Result<(), CircuitBreakerError> {
        if self.is_open() {
            self.stats.total_rejections.fetch_add(1, Ordering::Relaxed);
            metrics::record_circuit_rejection();
            return Err(CircuitBreakerError::Open {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Record a successful call
    ///
    /// Resets the consecutive count while Closed. A success while Open does not
    /// close the circuit; only [`CircuitBreaker::close`] does.
    pub fn record_success(&self) {
        self.stats.total_successes.fetch_add(1, Ordering::Relaxed);

        let state = self.lock_state();
        if *state == CircuitState::Closed {
            self.stats.consecutive_failures.store(0, Ordering::Release);
        }
    }

    /// Record a failed call, opening the circuit at the threshold
    pub fn record_failure(&self) -> CircuitState {
        self.stats.total_failures.fetch_add(1, Ordering::Relaxed);

        let mut state = self.lock_state();
        let failures = self
            .stats
            .consecutive_failures
            .load(Ordering::Acquire)
            .saturating_add(1)
            .min(self.threshold);
        self.stats.consecutive_failures.store(failures, Ordering::Release);

        if *state == CircuitState::Closed && failures >= self.threshold {
            *state = CircuitState::Open;
            metrics::set_circuit_open(true);
            tracing::warn!(
                circuit_breaker = %self.name,
                state = "Closed -> Open",
                consecutive_failures = failures,
                failure_threshold = self.threshold,
                "Circuit breaker opened due to consecutive failures"
            );
        }

        *state
    }

    /// Close the circuit after the store proved healthy, clearing the failure count
    pub fn close(&self) {
        let mut state = self.lock_state();
        self.stats.consecutive_failures.store(0, Ordering::Release);

        if *state == CircuitState::Open {
            *state = CircuitState::Closed;
            metrics::set_circuit_open(false);
            tracing::info!(
                circuit_breaker = %self.name,
                state = "Open -> Closed",
                "Circuit breaker closed, database is healthy"
            );
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CircuitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("consecutive_failures", &self.consecutive_failures())
            .field("threshold", &self.threshold)
            .field("total_failures", &self.total_failures())
            .finish()
    }
}
