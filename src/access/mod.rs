//! Data access facade
//!
//! [`DataAccess`] ties the pool, the query cache and the health monitor together.
//! Application code talks to it and to nothing below it.

mod error;
mod facade;
mod options;
mod report;

pub use error::DataAccessError;
pub use facade::DataAccess;
pub use options::{DataAccessConfig, FetchOptions};
pub use report::{CircuitBreakerReport, HealthReport, OverallStatus, PerformanceReport};
