//! Failure detection for the database
//!
//! - **Circuit Breaker**: binary Closed/Open gate that fails calls fast once the
//!   store has failed `threshold` times in a row.
//! - **Health Monitor**: probes the store periodically and on demand, owns the
//!   health status, and is the only component that opens or closes the breaker.

mod circuit_breaker;
mod health;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use health::{HealthMonitor, HealthStatus};
