//! Physical store connections
//!
//! The pool is generic over a [`Connector`], which opens [`Connection`]s. Rows are
//! exchanged as JSON objects so results can be cached without a second encoding
//! step, and positional arguments are JSON values so they can be fingerprinted.

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// One result row, column name to value, in column order
pub type Row = Map<String, JsonValue>;

/// Positional statement argument
pub type QueryArg = JsonValue;

/// Failure reported by the backing store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The statement was rejected (syntax, constraint, type mismatch)
    #[error("Query failed: {0}")]
    Query(String),

    /// The connection itself failed; it must not be reused
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The statement exceeded the command timeout
    #[error("Statement timed out after {0}ms")]
    Timeout(u64),
}

impl StoreError {
    /// Whether the connection that produced this error should be discarded
    ///
    /// A timed-out statement may still be running server side, so the connection
    /// is treated as broken too.
    pub fn breaks_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Timeout(_))
    }
}

/// A single physical connection to the store
#[async_trait]
pub trait Connection: Send + 'static {
    /// Run a statement and return the number of affected rows
    async fn execute(&mut self, sql: &str, args: &[QueryArg]) -> Result<u64, StoreError>;

    /// Run a query and return every row
    async fn fetch(&mut self, sql: &str, args: &[QueryArg]) -> Result<Vec<Row>, StoreError>;

    /// Run a query and return the first row, if any
    async fn fetch_one(&mut self, sql: &str, args: &[QueryArg]) -> Result<Option<Row>, StoreError>;

    /// Run a query and return the first column of the first row, if any
    async fn fetch_scalar(
        &mut self,
        sql: &str,
        args: &[QueryArg],
    ) -> Result<Option<JsonValue>, StoreError> {
        Ok(self
            .fetch_one(sql, args)
            .await?
            .and_then(|row| row.into_iter().next().map(|(_, value)| value)))
    }

    /// Trivial round trip used by health probes
    async fn ping(&mut self) -> Result<(), StoreError> {
        self.fetch_scalar("SELECT 1", &[]).await.map(|_| ())
    }

    /// Close the connection gracefully
    async fn close(self) -> Result<(), StoreError>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Opens physical connections on behalf of the pool
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    async fn connect(&self) -> Result<Self::Connection, StoreError>;
}
