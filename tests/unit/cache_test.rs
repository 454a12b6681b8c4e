// Cache backends and the cache store, seen through query cache keys

use prepnexus_data::cache::{Cache, CacheKey, CacheStore, LocalCache, NullCache, RedisCache};
use prepnexus_data::testing::{setup, FlakyCache};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Blog {
    id: u64,
    title: String,
    tags: Vec<String>,
}

const TTL: Duration = Duration::from_secs(60);

// ============================================================================
// Resource invalidation over real fingerprints
// ============================================================================

#[tokio::test]
async fn test_resource_pattern_scopes_invalidation() {
    let store = setup::cache();

    let blogs = CacheKey::query("SELECT * FROM blogs WHERE id = $1", &[json!(1)]);
    let joined = CacheKey::query(
        "SELECT b.* FROM users u JOIN blogs b ON b.author_id = u.id",
        &[],
    );
    let users = CacheKey::query("SELECT * FROM users", &[]);

    for key in [&blogs, &joined, &users] {
        assert!(store.set(key, &json!([{"id": 1}]), TTL).await);
    }

    assert_eq!(store.delete_pattern(&CacheKey::resource_pattern("blogs")).await, 2);

    assert!(!store.exists(&blogs).await);
    assert!(!store.exists(&joined).await);
    assert!(store.exists(&users).await);
}

#[tokio::test]
async fn test_resource_pattern_is_case_insensitive() {
    let store = setup::cache();
    let key = CacheKey::query("SELECT * FROM Blogs", &[]);
    store.set(&key, &json!([]), TTL).await;

    assert_eq!(store.delete_pattern(&CacheKey::resource_pattern("BLOGS")).await, 1);
}

#[tokio::test]
async fn test_clear_all_query_entries() {
    let store = setup::cache();
    for id in 0..5 {
        let key = CacheKey::query("SELECT * FROM questions WHERE id = $1", &[json!(id)]);
        store.set(&key, &json!({"id": id}), TTL).await;
    }
    store.set("session:abc", &"not a query", TTL).await;

    assert_eq!(store.delete_pattern(&CacheKey::all()).await, 5);
    assert!(store.exists("session:abc").await);
}

// ============================================================================
// Typed values
// ============================================================================

#[tokio::test]
async fn test_typed_round_trip_and_stats() {
    let backend = Arc::new(LocalCache::new());
    let store = CacheStore::new(backend.clone(), Duration::from_secs(1));

    let blog = Blog {
        id: 7,
        title: "Exam tips".to_string(),
        tags: vec!["study".to_string()],
    };
    store.set("blog:7", &blog, TTL).await;

    assert_eq!(store.get::<Blog>("blog:7").await, Some(blog));
    assert_eq!(store.get::<Blog>("blog:8").await, None);

    let stats = backend.stats().await.unwrap();
    assert_eq!(stats.backend, "local");
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.sets, 1);
    assert_eq!(stats.size, 1);
    assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_shape_mismatch_reads_as_miss() {
    let store = setup::cache();
    store.set("blog:1", &json!("just a string"), TTL).await;

    assert_eq!(store.get::<Blog>("blog:1").await, None);
}

#[tokio::test(start_paused = true)]
async fn test_entries_expire_after_ttl() {
    let store = setup::cache();
    store.set("k", &1, Duration::from_secs(2)).await;

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(store.get::<i32>("k").await, Some(1));

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(store.get::<i32>("k").await, None);
}

// ============================================================================
// Fail-open behaviour
// ============================================================================

#[tokio::test]
async fn test_disabled_cache_never_stores() {
    let store = CacheStore::disabled();

    assert!(store.set("k", &1, TTL).await);
    assert_eq!(store.get::<i32>("k").await, None);
    assert_eq!(store.backend_name(), "null");
    assert!(store.is_available().await);
}

#[tokio::test]
async fn test_null_cache_backend() {
    let cache = NullCache::new();

    cache.set("k", "1", TTL).await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), None);
    assert_eq!(cache.delete_pattern("db:*").await.unwrap(), 0);
}

#[tokio::test]
async fn test_failing_backend_degrades_to_miss() {
    let store = setup::store(FlakyCache::failing());

    assert_eq!(store.get::<Blog>("blog:1").await, None);
    assert!(!store.exists("blog:1").await);
    assert!(!store.delete("blog:1").await);
    assert!(!store.clear().await);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_backend_is_bounded() {
    let store = CacheStore::new(Arc::new(FlakyCache::hanging()), Duration::from_millis(250));

    let started = tokio::time::Instant::now();
    assert_eq!(store.get::<i32>("k").await, None);
    assert!(started.elapsed() < Duration::from_secs(1));
}

// ============================================================================
// Redis (needs a local server)
// ============================================================================

#[tokio::test]
#[ignore = "requires a Redis server on localhost:6379"]
async fn test_redis_pattern_invalidation() {
    let redis = RedisCache::new("redis://localhost:6379", "prepnexus-test").await.unwrap();
    let store = CacheStore::new(Arc::new(redis), Duration::from_secs(1));
    store.clear().await;

    let blogs = CacheKey::query("SELECT * FROM blogs", &[]);
    let users = CacheKey::query("SELECT * FROM users", &[]);
    store.set(&blogs, &json!([]), TTL).await;
    store.set(&users, &json!([]), TTL).await;

    assert_eq!(store.delete_pattern(&CacheKey::resource_pattern("blogs")).await, 1);
    assert!(store.exists(&users).await);

    store.clear().await;
}
