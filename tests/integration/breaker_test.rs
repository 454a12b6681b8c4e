//! Circuit breaker behaviour seen through the facade

use prepnexus_data::testing::{setup, MockConnector};
use prepnexus_data::{CircuitState, DataAccessConfig, DataAccessError, FetchOptions, StoreError};
use std::time::Duration;

const INTERVAL: Duration = Duration::from_secs(30);

async fn data_access(connector: &MockConnector) -> prepnexus_data::DataAccess<MockConnector> {
    let config = DataAccessConfig {
        health_interval: INTERVAL,
        ..DataAccessConfig::new(setup::pool_config(1, 2))
    };
    setup::data_access_with(connector, config, setup::cache()).await
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_after_threshold_and_fails_fast() {
    let connector = MockConnector::new();
    let db = data_access(&connector).await;
    connector.set_failing(true);

    for attempt in 1..=5 {
        let err = db.fetch("SELECT 1", &[], FetchOptions::no_cache()).await.unwrap_err();
        assert!(matches!(err, DataAccessError::Store(StoreError::Connection(_))), "attempt {attempt}");
    }
    assert_eq!(db.health().breaker().state(), CircuitState::Open);

    let statements = connector.statements();
    let opened = connector.connections_opened();
    let pings = connector.pings();

    let started = tokio::time::Instant::now();
    let err = db.fetch("SELECT 1", &[], FetchOptions::no_cache()).await.unwrap_err();

    assert_eq!(err, DataAccessError::ServiceUnavailable);
    assert!(started.elapsed() < Duration::from_millis(1));
    // No pool contact
    assert_eq!(connector.statements(), statements);
    assert_eq!(connector.connections_opened(), opened);
    assert_eq!(connector.pings(), pings);
    assert_eq!(db.health().breaker().total_rejections(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_also_guards_writes_and_cached_reads() {
    let connector = MockConnector::new();
    let db = data_access(&connector).await;

    // Warm the cache while healthy
    db.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await.unwrap();

    connector.set_failing(true);
    for _ in 0..5 {
        db.execute("UPDATE blogs SET title = 'x'", &[]).await.unwrap_err();
    }

    assert_eq!(
        db.execute("UPDATE blogs SET title = 'x'", &[]).await.unwrap_err(),
        DataAccessError::ServiceUnavailable
    );
    assert_eq!(
        db.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await.unwrap_err(),
        DataAccessError::ServiceUnavailable
    );
}

#[tokio::test(start_paused = true)]
async fn test_success_between_failures_keeps_breaker_closed() {
    let connector = MockConnector::new();
    let db = data_access(&connector).await;

    for _ in 0..3 {
        connector.set_failing(true);
        for _ in 0..4 {
            db.fetch("SELECT 1", &[], FetchOptions::no_cache()).await.unwrap_err();
        }
        connector.set_failing(false);
        db.fetch("SELECT 1", &[], FetchOptions::no_cache()).await.unwrap();
    }

    assert_eq!(db.health().breaker().state(), CircuitState::Closed);
    assert_eq!(db.health_status().consecutive_error_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_status_probe_closes_breaker() {
    let connector = MockConnector::new();
    let db = data_access(&connector).await;

    connector.set_failing(true);
    for _ in 0..5 {
        db.fetch("SELECT 1", &[], FetchOptions::no_cache()).await.unwrap_err();
    }
    connector.set_failing(false);

    // Still open while the last probe is fresh
    assert_eq!(
        db.fetch("SELECT 1", &[], FetchOptions::no_cache()).await.unwrap_err(),
        DataAccessError::ServiceUnavailable
    );

    tokio::time::advance(INTERVAL + Duration::from_secs(1)).await;

    let rows = db.fetch("SELECT 1", &[], FetchOptions::no_cache()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(db.health().breaker().state(), CircuitState::Closed);
    assert!(db.health_status().is_healthy);
    assert_eq!(db.health_status().consecutive_error_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_probe_failure_keeps_breaker_open() {
    let connector = MockConnector::new();
    let db = data_access(&connector).await;

    connector.set_failing(true);
    for _ in 0..5 {
        db.fetch("SELECT 1", &[], FetchOptions::no_cache()).await.unwrap_err();
    }

    tokio::time::advance(INTERVAL + Duration::from_secs(1)).await;

    assert_eq!(
        db.fetch("SELECT 1", &[], FetchOptions::no_cache()).await.unwrap_err(),
        DataAccessError::ServiceUnavailable
    );
    assert!(!db.health_status().is_healthy);
    // Capped at the threshold
    assert_eq!(db.health_status().consecutive_error_count, 5);
}

#[tokio::test(start_paused = true)]
async fn test_background_monitor_recovers_without_traffic() {
    let connector = MockConnector::new();
    let db = data_access(&connector).await;
    db.start_health_monitor();

    connector.set_failing(true);
    for _ in 0..5 {
        db.fetch("SELECT 1", &[], FetchOptions::no_cache()).await.unwrap_err();
    }
    assert!(db.health().breaker().is_open());

    connector.set_failing(false);
    tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;

    assert!(!db.health().breaker().is_open());
    assert!(db.health_status().is_healthy);

    db.close().await;
}
