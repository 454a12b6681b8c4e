//! Integration tests for the data access layer
//!
//! The store is the scriptable `MockConnector` unless a test says otherwise;
//! latency scenarios run on a paused Tokio clock.

pub mod breaker_test;
pub mod facade_test;
pub mod health_test;
