//! SeaORM-backed store connections
//!
//! Each pooled connection is a SeaORM `DatabaseConnection` restricted to a single
//! underlying driver connection, so the outer [`Pool`](super::Pool) stays the only
//! place that decides how many physical connections exist.

use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, FromQueryResult,
    QueryResult, Statement, TryGetable, Value,
};
use serde_json::Value as JsonValue;

use super::connection::{Connection, Connector, QueryArg, Row, StoreError};
use crate::config::DatabaseConfig;

impl From<DbErr> for StoreError {
    fn from(error: DbErr) -> Self {
        match error {
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => StoreError::Connection(error.to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Opens single-connection SeaORM handles
#[derive(Debug, Clone)]
pub struct SeaOrmConnector {
    url: String,
    connect_timeout: Duration,
}

impl SeaOrmConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            url: config.connection_url(),
            connect_timeout: config.acquire_timeout(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for SeaOrmConnector {
    type Connection = SeaOrmConnection;

    async fn connect(&self) -> Result<Self::Connection, StoreError> {
        let mut options = ConnectOptions::new(self.url.clone());
        options
            .min_connections(1)
            .max_connections(1)
            .connect_timeout(self.connect_timeout)
            .acquire_timeout(self.connect_timeout)
            .sqlx_logging(false);

        let db = Database::connect(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(SeaOrmConnection { db })
    }
}

/// One physical connection driven through SeaORM
#[derive(Debug)]
pub struct SeaOrmConnection {
    db: DatabaseConnection,
}

impl SeaOrmConnection {
    fn statement(&self, sql: &str, args: &[QueryArg]) -> Statement {
        Statement::from_sql_and_values(
            self.db.get_database_backend(),
            sql,
            args.iter().map(to_db_value),
        )
    }
}

#[async_trait]
impl Connection for SeaOrmConnection {
    async fn execute(&mut self, sql: &str, args: &[QueryArg]) -> Result<u64, StoreError> {
        let result = self.db.execute(self.statement(sql, args)).await?;
        Ok(result.rows_affected())
    }

    async fn fetch(&mut self, sql: &str, args: &[QueryArg]) -> Result<Vec<Row>, StoreError> {
        let rows = self.db.query_all(self.statement(sql, args)).await?;
        Ok(rows.iter().map(into_row).collect())
    }

    async fn fetch_one(&mut self, sql: &str, args: &[QueryArg]) -> Result<Option<Row>, StoreError> {
        let row = self.db.query_one(self.statement(sql, args)).await?;
        Ok(row.as_ref().map(into_row))
    }

    async fn ping(&mut self) -> Result<(), StoreError> {
        self.db.ping().await.map_err(StoreError::from)
    }

    async fn close(self) -> Result<(), StoreError> {
        self.db.close().await.map_err(StoreError::from)
    }
}

/// Convert a result row to JSON, keeping the statement's column order
///
/// SeaORM maps columns by their declared type. Expression columns such as
/// `COUNT(*)` carry none on SQLite, so whatever it leaves out is decoded by index.
fn into_row(result: &QueryResult) -> Row {
    let mut typed = match JsonValue::from_query_result(result, "") {
        Ok(JsonValue::Object(row)) => row,
        _ => Row::new(),
    };

    result
        .column_names()
        .into_iter()
        .enumerate()
        .map(|(idx, name)| {
            let value = typed.remove(&name).unwrap_or_else(|| decode_untyped(result, idx));
            (name, value)
        })
        .collect()
}

fn decode_untyped(result: &QueryResult, idx: usize) -> JsonValue {
    fn get<T: TryGetable>(result: &QueryResult, idx: usize) -> Option<Option<T>> {
        result.try_get_by_index::<Option<T>>(idx).ok()
    }

    if let Some(v) = get::<i64>(result, idx) {
        return v.map_or(JsonValue::Null, JsonValue::from);
    }
    if let Some(v) = get::<i32>(result, idx) {
        return v.map_or(JsonValue::Null, JsonValue::from);
    }
    if let Some(v) = get::<f64>(result, idx) {
        return v.map_or(JsonValue::Null, JsonValue::from);
    }
    if let Some(v) = get::<String>(result, idx) {
        return v.map_or(JsonValue::Null, JsonValue::from);
    }
    if let Some(v) = get::<bool>(result, idx) {
        return v.map_or(JsonValue::Null, JsonValue::from);
    }
    if let Some(v) = get::<Vec<u8>>(result, idx) {
        return v.map_or(JsonValue::Null, |bytes| JsonValue::from(String::from_utf8_lossy(&bytes).into_owned()));
    }

    tracing::debug!(column = idx, "Column has no JSON representation, returning null");
    JsonValue::Null
}

/// Bind a JSON argument as the closest native parameter type
fn to_db_value(arg: &QueryArg) -> Value {
    match arg {
        JsonValue::Null => Value::String(None),
        JsonValue::Bool(b) => Value::from(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                Value::from(n.as_f64().unwrap_or_default())
            }
        }
        JsonValue::String(s) => Value::from(s.clone()),
        other => Value::from(other.clone()),
    }
}
