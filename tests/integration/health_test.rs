//! Integration tests for the HTTP surface
//!
//! - /health and /live (liveness, never touch the database)
//! - /ready (database gate, cache reported only)
//! - /health/db (full report, 503 when unhealthy)
//! - /metrics (Prometheus text)

use actix_web::http::StatusCode;
use actix_web::test::{call_service, init_service, read_body, read_body_json, TestRequest};
use actix_web::{web, App};
use prepnexus_data::metrics::AppMetrics;
use prepnexus_data::testing::{setup, MockConnector};
use prepnexus_data::{router, DataAccess, FetchOptions};
use serde_json::Value;

macro_rules! service {
    ($db:expr) => {
        init_service(
            App::new()
                .app_data(web::Data::new($db))
                .app_data(web::Data::new(AppMetrics::new()))
                .configure(router::route::<MockConnector>),
        )
        .await
    };
}

async fn open_breaker(connector: &MockConnector, db: &DataAccess<MockConnector>) {
    connector.set_failing(true);
    for _ in 0..5 {
        db.fetch("SELECT 1", &[], FetchOptions::no_cache()).await.unwrap_err();
    }
}

// =============================================================================
// Liveness
// =============================================================================

#[actix_web::test]
async fn test_liveness_endpoints_return_200_even_when_database_is_down() {
    let connector = MockConnector::new();
    let db = setup::data_access(&connector, 1, 2).await;
    open_breaker(&connector, &db).await;
    let service = service!(db);

    for uri in ["/health", "/live"] {
        let resp = call_service(&service, TestRequest::get().uri(uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK, "{uri} should always return 200 OK");

        let body: Value = read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert!(body["timestamp"].as_str().unwrap().contains('T'), "timestamp should be ISO 8601");
    }
}

// =============================================================================
// Readiness
// =============================================================================

#[actix_web::test]
async fn test_ready_when_database_is_healthy() {
    let db = setup::data_access(&MockConnector::new(), 1, 2).await;
    let service = service!(db);

    let resp = call_service(&service, TestRequest::get().uri("/ready").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = read_body_json(resp).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["database"], "connected");
    assert_eq!(body["cache"], "available");
}

#[actix_web::test]
async fn test_not_ready_while_breaker_is_open() {
    let connector = MockConnector::new();
    let db = setup::data_access(&connector, 1, 2).await;
    open_breaker(&connector, &db).await;
    let service = service!(db);

    let resp = call_service(&service, TestRequest::get().uri("/ready").to_request()).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = read_body_json(resp).await;
    assert_eq!(body["status"], "not_ready");
    assert_eq!(body["database"], "disconnected");
}

// =============================================================================
// Database report
// =============================================================================

#[actix_web::test]
async fn test_health_db_report() {
    let db = setup::data_access(&MockConnector::new(), 2, 4).await;
    let service = service!(db);

    let resp = call_service(&service, TestRequest::get().uri("/health/db").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"]["database"], "prepnexus");
    assert_eq!(body["database"]["port"], 5432);
    assert!(body["database"].get("password").is_none());
    assert_eq!(body["performance"]["totalConnections"], 2);
    assert_eq!(body["performance"]["activeConnections"], 0);
    assert!(body["performance"]["responseTimeMs"].is_number());
    assert_eq!(body["circuitBreaker"]["open"], false);
    assert_eq!(body["circuitBreaker"]["errorCount"], 0);
    assert!(body["lastError"].is_null());
}

#[actix_web::test]
async fn test_health_db_503_while_database_is_down() {
    let connector = MockConnector::new();
    let db = setup::data_access(&connector, 1, 2).await;
    open_breaker(&connector, &db).await;
    let service = service!(db);

    let resp = call_service(&service, TestRequest::get().uri("/health/db").to_request()).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = read_body_json(resp).await;
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["circuitBreaker"]["open"], true);
    assert_eq!(body["circuitBreaker"]["errorCount"], 5);
    assert_eq!(body["lastError"], "Connection failed: connection reset by peer");
}

// =============================================================================
// Metrics
// =============================================================================

#[actix_web::test]
async fn test_metrics_reflect_database_traffic() {
    let db = setup::data_access(&MockConnector::new(), 1, 2).await;
    db.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await.unwrap();
    let service = service!(db);

    // Traffic recorded once the /metrics recorder is installed
    let warm = setup::data_access(&MockConnector::new(), 1, 1).await;
    warm.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await.unwrap();
    warm.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await.unwrap();

    let resp = call_service(&service, TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = read_body(resp).await;
    let text = std::str::from_utf8(&body).unwrap();
    assert!(text.contains("database_queries_total"));
    assert!(text.contains("cache_hits_total"));
    assert!(text.contains("database_health_probes_total"));
}
