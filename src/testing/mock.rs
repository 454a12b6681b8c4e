use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::database::{Connection, Connector, QueryArg, Row, StoreError};

#[derive(Debug, Default)]
struct MockState {
    latency: Mutex<Duration>,
    failure: Mutex<Option<StoreError>>,
    refuse_connections: AtomicBool,
    rows: Mutex<HashMap<String, Vec<Row>>>,
    affected_rows: AtomicUsize,
    executed: Mutex<Vec<(String, Vec<QueryArg>)>>,
    connections_opened: AtomicUsize,
    connections_closed: AtomicUsize,
    statements: AtomicUsize,
    pings: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Scriptable in-memory store used by the test-suite
///
/// Clones share state, so a test keeps one handle to steer the store while the
/// pool owns another. Unregistered queries answer with a single `{"value": 1}` row.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        let connector = Self::default();
        connector.state.affected_rows.store(1, Ordering::Relaxed);
        connector
    }

    /// Delay applied to every statement and ping
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.state.latency) = latency;
    }

    /// Make every statement and ping fail with `error`, or succeed again with `None`
    pub fn fail_with(&self, error: Option<StoreError>) {
        *lock(&self.state.failure) = error;
    }

    /// Shorthand for failing with a connection reset
    pub fn set_failing(&self, failing: bool) {
        self.fail_with(failing.then(|| StoreError::Connection("connection reset by peer".to_string())));
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse_connections.store(refuse, Ordering::Relaxed);
    }

    /// Canned result for one exact query text
    pub fn set_rows(&self, sql: &str, rows: Vec<Row>) {
        lock(&self.state.rows).insert(sql.to_string(), rows);
    }

    pub fn set_affected_rows(&self, affected: usize) {
        self.state.affected_rows.store(affected, Ordering::Relaxed);
    }

    pub fn connections_opened(&self) -> usize {
        self.state.connections_opened.load(Ordering::Relaxed)
    }

    pub fn connections_closed(&self) -> usize {
        self.state.connections_closed.load(Ordering::Relaxed)
    }

    /// Statements that reached the store, pings excluded
    pub fn statements(&self) -> usize {
        self.state.statements.load(Ordering::Relaxed)
    }

    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::Relaxed)
    }

    /// Highest number of statements observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::Relaxed)
    }

    /// Every `execute` call seen so far
    pub fn executed(&self) -> Vec<(String, Vec<QueryArg>)> {
        lock(&self.state.executed).clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<Self::Connection, StoreError> {
        if self.state.refuse_connections.load(Ordering::Relaxed) {
            return Err(StoreError::Connection("connection refused".to_string()));
        }
        self.state.connections_opened.fetch_add(1, Ordering::Relaxed);
        Ok(MockConnection {
            state: Arc::clone(&self.state),
        })
    }
}

/// Connection handed out by [`MockConnector`]
#[derive(Debug)]
pub struct MockConnection {
    state: Arc<MockState>,
}

impl MockConnection {
    async fn run(&self) -> Result<(), StoreError> {
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *lock(&self.state.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        match lock(&self.state.failure).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn rows_for(&self, sql: &str) -> Vec<Row> {
        lock(&self.state.rows).get(sql).cloned().unwrap_or_else(|| {
            let mut row = Row::new();
            row.insert("value".to_string(), json!(1));
            vec![row]
        })
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, sql: &str, args: &[QueryArg]) -> Result<u64, StoreError> {
        self.state.statements.fetch_add(1, Ordering::Relaxed);
        self.run().await?;
        lock(&self.state.executed).push((sql.to_string(), args.to_vec()));
        Ok(self.state.affected_rows.load(Ordering::Relaxed) as u64)
    }

    async fn fetch(&mut self, sql: &str, _args: &[QueryArg]) -> Result<Vec<Row>, StoreError> {
        self.state.statements.fetch_add(1, Ordering::Relaxed);
        self.run().await?;
        Ok(self.rows_for(sql))
    }

    async fn fetch_one(&mut self, sql: &str, _args: &[QueryArg]) -> Result<Option<Row>, StoreError> {
        self.state.statements.fetch_add(1, Ordering::Relaxed);
        self.run().await?;
        Ok(self.rows_for(sql).into_iter().next())
    }

    async fn ping(&mut self) -> Result<(), StoreError> {
        self.state.pings.fetch_add(1, Ordering::Relaxed);
        self.run().await
    }

    async fn close(self) -> Result<(), StoreError> {
        self.state.connections_closed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
