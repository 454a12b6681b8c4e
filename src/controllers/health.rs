//! Health check endpoints
//!
//! Liveness never touches dependencies; readiness and `/health/db` report on
//! the database through [`DataAccess`].

use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::DataAccess;
use crate::database::Connector;

/// Liveness health check response (simple)
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessResponse {
    /// Service status
    pub status: String,
    /// Timestamp of the check
    pub timestamp: DateTime<Utc>,
}

/// Readiness health check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResponse {
    /// Service readiness status
    pub status: String,
    /// Timestamp of the check
    pub timestamp: DateTime<Utc>,
    /// Database connection status
    pub database: String,
    /// Cache availability status
    pub cache: String,
}

/// Liveness check endpoint
///
/// Always 200 OK while the process is serving requests.
pub async fn health() -> impl Responder {
    let response = LivenessResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    };

    ::tracing::debug!("Liveness check: healthy");
    web::Json(response)
}

/// Liveness probe (alias for /health)
pub async fn live() -> impl Responder {
    health().await
}

/// Full database report: identity, latency, pool occupancy, cache and breaker
///
/// Runs a fresh probe. 503 when the database is unhealthy or the breaker is open.
pub async fn health_db<C: Connector>(db: web::Data<DataAccess<C>>) -> HttpResponse {
    let report = db.health_report().await;

    if report.is_healthy() {
        HttpResponse::Ok().json(report)
    } else {
        ::tracing::warn!(
            error = report.last_error.as_deref().unwrap_or_default(),
            breaker_open = report.circuit_breaker.open,
            "Database health check failed"
        );
        HttpResponse::ServiceUnavailable().json(report)
    }
}

/// Readiness probe
///
/// Ready while the database is healthy and the breaker is closed. The cache is
/// reported but never blocks readiness, since reads fall back to the database.
pub async fn ready<C: Connector>(db: web::Data<DataAccess<C>>) -> HttpResponse {
    let timestamp = Utc::now();

    let status = db
        .health()
        .probe_if_stale()
        .await
        .unwrap_or_else(|| db.health_status());
    let db_ready = status.is_healthy && !db.health().breaker().is_open();
    let database_status = if db_ready { "connected" } else { "disconnected" };

    let cache_status = if db.cache().is_available().await {
        "available"
    } else {
        "unavailable"
    };

    let response = ReadinessResponse {
        status: if db_ready { "ready" } else { "not_ready" }.to_string(),
        timestamp,
        database: database_status.to_string(),
        cache: cache_status.to_string(),
    };

    ::tracing::debug!(
        status = %response.status,
        database = %database_status,
        cache = %cache_status,
        "Readiness check performed"
    );

    if db_ready {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}
