//! End-to-end behaviour of `DataAccess` over the mock store

use prepnexus_data::database::{PoolConfig, Row};
use prepnexus_data::testing::{setup, FlakyCache, MockConnector};
use prepnexus_data::{DataAccess, DataAccessConfig, FetchOptions};
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;

fn blog(id: i64, title: &str) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), json!(id));
    row.insert("title".to_string(), json!(title));
    row
}

// =============================================================================
// Pool contention
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_third_caller_waits_for_a_free_slot() {
    let connector = MockConnector::new();
    let pool = PoolConfig::new(1, 2, Duration::from_secs(5), Duration::from_secs(30)).unwrap();
    let db = setup::data_access_with(&connector, DataAccessConfig::new(pool), setup::cache()).await;
    connector.set_latency(Duration::from_secs(2));

    let started = Instant::now();
    let calls: Vec<_> = (0..3)
        .map(|_| {
            let db = db.clone();
            tokio::spawn(async move { db.fetch("SELECT 1", &[], FetchOptions::default()).await })
        })
        .collect();

    for call in calls {
        let rows = call.await.unwrap().unwrap();
        assert_eq!(rows[0]["value"], json!(1));
    }

    // Two rounds of 2 s: the third call queued behind the first two
    assert!(started.elapsed() >= Duration::from_secs(4));
    assert_eq!(connector.max_in_flight(), 2);
    assert_eq!(db.pool_size().total, 2);
    assert_eq!(db.pool_size().active, 0);
}

#[tokio::test(start_paused = true)]
async fn test_pool_timeout_surfaces_and_counts() {
    let connector = MockConnector::new();
    let db = setup::data_access(&connector, 1, 1).await;
    connector.set_latency(Duration::from_secs(3));

    let slow = {
        let db = db.clone();
        tokio::spawn(async move { db.fetch("SELECT 1", &[], FetchOptions::no_cache()).await })
    };
    tokio::task::yield_now().await;

    let err = db.fetch("SELECT 1", &[], FetchOptions::no_cache()).await.unwrap_err();
    assert_eq!(err, prepnexus_data::DataAccessError::PoolTimeout(Duration::from_secs(1)));
    assert_eq!(db.health_status().consecutive_error_count, 1);

    assert!(slow.await.unwrap().is_ok());
}

// =============================================================================
// Cache-aside reads
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_second_read_is_served_from_cache() {
    let connector = MockConnector::new();
    connector.set_rows("SELECT * FROM blogs LIMIT 1", vec![blog(1, "Welcome")]);
    let db = setup::data_access(&connector, 1, 2).await;
    connector.set_latency(Duration::from_millis(80));

    let started = Instant::now();
    let first = db.fetch("SELECT * FROM blogs LIMIT 1", &[], FetchOptions::default()).await.unwrap();
    let cold = started.elapsed();

    let started = Instant::now();
    let second = db.fetch("SELECT * FROM blogs LIMIT 1", &[], FetchOptions::default()).await.unwrap();
    let warm = started.elapsed();

    assert_eq!(first, second);
    assert_eq!(first, vec![blog(1, "Welcome")]);
    assert!(cold >= Duration::from_millis(80));
    assert!(warm < cold / 4);
    assert_eq!(connector.statements(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_entries_expire_after_their_ttl() {
    let connector = MockConnector::new();
    let db = setup::data_access(&connector, 1, 2).await;
    let options = FetchOptions::ttl(Duration::from_secs(10));

    db.fetch("SELECT * FROM blogs", &[], options).await.unwrap();
    tokio::time::advance(Duration::from_secs(5)).await;
    db.fetch("SELECT * FROM blogs", &[], options).await.unwrap();
    assert_eq!(connector.statements(), 1);

    tokio::time::advance(Duration::from_secs(6)).await;
    db.fetch("SELECT * FROM blogs", &[], options).await.unwrap();
    assert_eq!(connector.statements(), 2);
}

#[tokio::test]
async fn test_args_select_distinct_entries() {
    let connector = MockConnector::new();
    let db = setup::data_access(&connector, 1, 2).await;
    let sql = "SELECT * FROM blogs WHERE id = $1";

    db.fetch_one(sql, &[json!(1)], FetchOptions::default()).await.unwrap();
    db.fetch_one(sql, &[json!(2)], FetchOptions::default()).await.unwrap();
    db.fetch_one(sql, &[json!(1)], FetchOptions::default()).await.unwrap();

    assert_eq!(connector.statements(), 2);
}

#[tokio::test]
async fn test_fetch_scalar_reads_first_column() {
    let connector = MockConnector::new();
    let mut row = Row::new();
    row.insert("count".to_string(), json!(42));
    row.insert("ignored".to_string(), json!("x"));
    connector.set_rows("SELECT COUNT(*) AS count, 'x' AS ignored FROM blogs", vec![row]);
    connector.set_rows("SELECT id FROM blogs WHERE id = -1", vec![]);
    let db = setup::data_access(&connector, 1, 2).await;

    let count = db
        .fetch_scalar("SELECT COUNT(*) AS count, 'x' AS ignored FROM blogs", &[], FetchOptions::default())
        .await
        .unwrap();
    let missing = db
        .fetch_scalar("SELECT id FROM blogs WHERE id = -1", &[], FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(count, Some(json!(42)));
    assert_eq!(missing, None);
}

// =============================================================================
// Invalidation
// =============================================================================

#[tokio::test]
async fn test_invalidate_only_touches_the_resource() {
    let connector = MockConnector::new();
    let db = setup::data_access(&connector, 1, 2).await;

    db.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await.unwrap();
    db.fetch_one("SELECT * FROM blogs WHERE id = $1", &[json!(3)], FetchOptions::default()).await.unwrap();
    db.fetch("SELECT * FROM exams", &[], FetchOptions::default()).await.unwrap();
    assert_eq!(connector.statements(), 3);

    assert_eq!(db.invalidate("blogs").await, 2);

    db.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await.unwrap();
    db.fetch("SELECT * FROM exams", &[], FetchOptions::default()).await.unwrap();
    assert_eq!(connector.statements(), 4);
}

#[tokio::test]
async fn test_invalidate_reaches_comma_joined_reads() {
    let connector = MockConnector::new();
    let db = setup::data_access(&connector, 1, 2).await;
    let sql = "SELECT u.name, b.title FROM users u, blogs b WHERE b.user_id = u.id";

    db.fetch(sql, &[], FetchOptions::default()).await.unwrap();
    db.fetch(sql, &[], FetchOptions::default()).await.unwrap();
    assert_eq!(connector.statements(), 1);

    assert_eq!(db.invalidate("blogs").await, 1);

    db.fetch(sql, &[], FetchOptions::default()).await.unwrap();
    assert_eq!(connector.statements(), 2);
}

#[tokio::test]
async fn test_clear_cache_and_stats() {
    let connector = MockConnector::new();
    let db = setup::data_access(&connector, 1, 2).await;

    db.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await.unwrap();
    db.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await.unwrap();
    db.fetch("SELECT * FROM exams", &[], FetchOptions::default()).await.unwrap();

    let stats = db.cache_stats().await.unwrap();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.size, 2);

    assert_eq!(db.clear_cache().await, 2);
    assert_eq!(db.cache_stats().await.unwrap().size, 0);
}

#[tokio::test]
async fn test_auto_invalidate_on_write() {
    let connector = MockConnector::new();
    let config = DataAccessConfig {
        auto_invalidate: true,
        ..DataAccessConfig::new(setup::pool_config(1, 2))
    };
    let db = setup::data_access_with(&connector, config, setup::cache()).await;

    db.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await.unwrap();
    db.execute("UPDATE blogs SET title = $1 WHERE id = $2", &[json!("New"), json!(1)])
        .await
        .unwrap();
    db.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await.unwrap();

    assert_eq!(connector.statements(), 3);
}

// =============================================================================
// Single flight
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_single_flight_collapses_concurrent_misses() {
    let connector = MockConnector::new();
    let config = DataAccessConfig {
        single_flight: true,
        ..DataAccessConfig::new(setup::pool_config(1, 8))
    };
    let db = setup::data_access_with(&connector, config, setup::cache()).await;
    connector.set_latency(Duration::from_millis(200));

    let calls: Vec<_> = (0..8)
        .map(|_| {
            let db = db.clone();
            tokio::spawn(async move { db.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await })
        })
        .collect();
    for call in calls {
        assert!(call.await.unwrap().is_ok());
    }

    assert_eq!(connector.statements(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_without_single_flight_misses_run_separately() {
    let connector = MockConnector::new();
    let db = setup::data_access(&connector, 1, 8).await;
    connector.set_latency(Duration::from_millis(200));

    let calls: Vec<_> = (0..4)
        .map(|_| {
            let db = db.clone();
            tokio::spawn(async move { db.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await })
        })
        .collect();
    for call in calls {
        assert!(call.await.unwrap().is_ok());
    }

    assert_eq!(connector.statements(), 4);
}

#[tokio::test]
async fn test_single_flight_shares_errors_then_retries() {
    let connector = MockConnector::new();
    let config = DataAccessConfig {
        single_flight: true,
        ..DataAccessConfig::new(setup::pool_config(1, 2))
    };
    let db = setup::data_access_with(&connector, config, setup::cache()).await;

    connector.set_failing(true);
    assert!(db.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await.is_err());

    connector.set_failing(false);
    assert!(db.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await.is_ok());
}

// =============================================================================
// Cache failures
// =============================================================================

#[tokio::test]
async fn test_failing_cache_falls_through_to_store() {
    let connector = MockConnector::new();
    connector.set_rows("SELECT * FROM blogs", vec![blog(1, "A")]);
    let db = setup::data_access_with(
        &connector,
        DataAccessConfig::new(setup::pool_config(1, 2)),
        setup::store(FlakyCache::failing()),
    )
    .await;

    for _ in 0..3 {
        let rows = db.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await.unwrap();
        assert_eq!(rows, vec![blog(1, "A")]);
    }

    assert_eq!(connector.statements(), 3);
    assert_eq!(db.invalidate("blogs").await, 0);
    assert!(db.cache_stats().await.is_none());
    assert!(!db.health_report().await.performance.cache_available);
    // Cache trouble never reaches the breaker
    assert_eq!(db.health_status().consecutive_error_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_cache_is_bounded() {
    let connector = MockConnector::new();
    let db = setup::data_access_with(
        &connector,
        DataAccessConfig::new(setup::pool_config(1, 2)),
        setup::store(FlakyCache::hanging()),
    )
    .await;

    let started = Instant::now();
    db.fetch("SELECT * FROM blogs", &[], FetchOptions::default()).await.unwrap();

    // get and set each give up after the 1 s operation timeout
    assert!(started.elapsed() <= Duration::from_secs(2));
    assert_eq!(connector.statements(), 1);
}

// =============================================================================
// Health report
// =============================================================================

#[tokio::test]
async fn test_health_report_shape() {
    let connector = MockConnector::new();
    let db = setup::data_access(&connector, 2, 4).await;

    let report = db.health_report().await;
    assert!(report.is_healthy());
    assert_eq!(report.performance.total_connections, 2);
    assert_eq!(report.performance.active_connections, 0);
    assert!(report.performance.cache_available);
    assert!(!report.circuit_breaker.open);
    assert_eq!(report.circuit_breaker.threshold, 5);
    assert!(report.last_check.is_some());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "healthy");
    for key in ["database", "performance", "circuitBreaker", "lastCheck", "lastError"] {
        assert!(json.get(key).is_some(), "missing {key}");
    }
    assert!(json["performance"].get("responseTimeMs").is_some());
    assert!(json["circuitBreaker"].get("errorCount").is_some());
}

#[tokio::test]
async fn test_health_report_probe_closes_breaker_and_keeps_last_error() {
    let connector = MockConnector::new();
    let db: DataAccess<MockConnector> = setup::data_access(&connector, 1, 2).await;

    connector.fail_with(Some(prepnexus_data::StoreError::Query("deadlock detected".to_string())));
    for _ in 0..5 {
        db.execute("UPDATE blogs SET title = 'x'", &[]).await.unwrap_err();
    }
    assert!(db.health().breaker().is_open());
    connector.fail_with(None);

    let report = db.health_report().await;
    assert!(!report.circuit_breaker.open);
    assert_eq!(report.circuit_breaker.error_count, 0);
    assert!(report.is_healthy());
    assert_eq!(report.last_error.as_deref(), Some("Query failed: deadlock detected"));
}
