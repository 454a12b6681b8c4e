use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::DatabaseIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub response_time_ms: f64,
    pub active_connections: usize,
    pub total_connections: usize,
    pub cache_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerReport {
    pub open: bool,
    pub error_count: u32,
    pub threshold: u32,
}

/// Snapshot served by the database health endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: OverallStatus,
    pub database: DatabaseIdentity,
    pub performance: PerformanceReport,
    pub circuit_breaker: CircuitBreakerReport,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == OverallStatus::Healthy
    }
}
