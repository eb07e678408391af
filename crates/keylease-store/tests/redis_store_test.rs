//! Integration tests for the Redis lock store
//!
//! These tests need a running Redis server. Set `KEYLEASE_TEST_REDIS_URL`
//! (defaults to `redis://127.0.0.1:6379/15`) and run with `--ignored`.

#![cfg(feature = "redis")]

use std::time::Duration;

use keylease_store::{LockStore, RedisConfig, RedisStore};

async fn connect() -> RedisStore {
    let url = std::env::var("KEYLEASE_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());
    RedisStore::connect(&RedisConfig::from_url(url))
        .await
        .expect("Redis must be reachable for ignored tests")
}

fn unique_key(name: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("keylease:test:{}:{}:{}", name, std::process::id(), nanos)
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_redis_set_if_absent_and_compare_and_delete() {
    let store = connect().await;
    let key = unique_key("cad");

    store.ping().await.unwrap();
    assert!(store.set_if_absent(&key, "a", Duration::from_secs(5)).await.unwrap());
    assert!(!store.set_if_absent(&key, "b", Duration::from_secs(5)).await.unwrap());

    assert!(!store.compare_and_delete(&key, "b").await.unwrap());
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("a"));

    assert!(store.compare_and_delete(&key, "a").await.unwrap());
    assert!(!store.exists(&key).await.unwrap());
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_redis_extend_and_health() {
    let store = connect().await;
    let key = unique_key("health");

    store.set_if_absent(&key, "a", Duration::from_millis(500)).await.unwrap();
    assert!(store.compare_and_extend(&key, "a", Duration::from_secs(10)).await.unwrap());
    assert!(!store.compare_and_extend(&key, "b", Duration::from_secs(10)).await.unwrap());

    let ttl = store.ttl(&key).await.unwrap().unwrap();
    assert!(ttl > Duration::from_secs(5));

    let health = store.health(&key, "a").await.unwrap();
    assert!(health.exists && health.is_owner);
    assert!(health.ttl_ms > 5_000);

    let foreign = store.health(&key, "b").await.unwrap();
    assert!(foreign.exists && !foreign.is_owner);

    store.delete(&key).await.unwrap();
    let absent = store.health(&key, "a").await.unwrap();
    assert!(!absent.exists);
    assert_eq!(store.ttl(&key).await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_redis_lease_expires() {
    let store = connect().await;
    let key = unique_key("expiry");

    store.set_if_absent(&key, "a", Duration::from_millis(100)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(!store.exists(&key).await.unwrap());
    assert!(!store.compare_and_extend(&key, "a", Duration::from_secs(1)).await.unwrap());
    assert!(store.set_if_absent(&key, "b", Duration::from_secs(1)).await.unwrap());
    store.delete(&key).await.unwrap();
}
