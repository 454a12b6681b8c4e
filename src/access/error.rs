use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::database::{PoolError, StoreError};
use crate::resilience::CircuitBreakerError;

/// Error returned by [`DataAccess`](super::DataAccess) operations
///
/// Cache problems never show up here; they degrade to cache misses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataAccessError {
    /// No connection became free within the acquire timeout
    #[error("Timed out after {0:?} waiting for a database connection")]
    PoolTimeout(Duration),

    /// The pool has been shut down; not worth retrying
    #[error("Database connection pool is closed")]
    PoolClosed,

    /// The circuit breaker is open
    #[error("Database temporarily unavailable")]
    ServiceUnavailable,

    /// The store rejected or failed the statement
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DataAccessError {
    /// Whether this failure is held against the circuit breaker
    pub fn counts_against_breaker(&self) -> bool {
        matches!(self, DataAccessError::PoolTimeout(_) | DataAccessError::Store(_))
    }
}

impl From<PoolError> for DataAccessError {
    fn from(error: PoolError) -> Self {
        match error {
            PoolError::Timeout(wait) => DataAccessError::PoolTimeout(wait),
            PoolError::Closed => DataAccessError::PoolClosed,
            PoolError::Connect(e) => DataAccessError::Store(e),
            PoolError::InvalidConfig(reason) => DataAccessError::Store(StoreError::Connection(reason)),
        }
    }
}

impl From<CircuitBreakerError> for DataAccessError {
    fn from(_: CircuitBreakerError) -> Self {
        DataAccessError::ServiceUnavailable
    }
}

impl ResponseError for DataAccessError {
    fn status_code(&self) -> StatusCode {
        match self {
            DataAccessError::PoolTimeout(_)
            | DataAccessError::PoolClosed
            | DataAccessError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            DataAccessError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Store messages can carry SQL fragments, keep them in the logs only
        let message = match self {
            DataAccessError::Store(_) => "Database error".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({ "message": message }))
    }
}
