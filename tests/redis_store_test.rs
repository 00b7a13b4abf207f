//! Redis receipt store against a live server
//!
//! Run with `REDIS_URL=redis://localhost:6379 cargo test -- --ignored`.

#![cfg(feature = "cache")]

use edupay_portal::cache::redis::{init_pool, RedisPool, RedisStoreConfig};
use edupay_portal::cache::{RedisSnapshotStore, SnapshotStore};
use std::time::Duration;
use uuid::Uuid;

const HOUR: Duration = Duration::from_secs(3600);

async fn setup_pool() -> RedisPool {
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let config = RedisStoreConfig {
        redis_url,
        max_connections: 2,
        ..RedisStoreConfig::default()
    };
    init_pool(&config)
        .await
        .expect("Failed to initialize Redis pool")
}

/// A store under a prefix no other test uses.
async fn setup_store(max_entries: usize) -> (RedisSnapshotStore, RedisPool) {
    let pool = setup_pool().await;
    let prefix = format!("edupay_test_{}", Uuid::new_v4().simple());
    (RedisSnapshotStore::new(pool.clone(), prefix, max_entries), pool)
}

async fn indexed_keys(pool: &RedisPool, store: &RedisSnapshotStore) -> Vec<String> {
    let mut conn = pool.get().await.expect("Failed to get connection");
    redis::cmd("ZRANGE")
        .arg(store.index_key())
        .arg(0)
        .arg(-1)
        .query_async(&mut *conn)
        .await
        .expect("ZRANGE failed")
}

async fn pause_between_writes() {
    // index scores have millisecond resolution
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_put_get_delete_keeps_index_in_sync() {
    let (store, pool) = setup_store(5).await;

    store
        .put("payment_REF-1", "snapshot".to_string(), HOUR)
        .await
        .unwrap();
    assert_eq!(
        store.get("payment_REF-1").await.unwrap(),
        Some("snapshot".to_string())
    );
    assert_eq!(indexed_keys(&pool, &store).await.len(), 1);

    store.delete("payment_REF-1").await.unwrap();
    assert_eq!(store.get("payment_REF-1").await.unwrap(), None);
    assert!(indexed_keys(&pool, &store).await.is_empty());
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_values_expire_after_ttl() {
    let (store, _pool) = setup_store(5).await;

    store
        .put("payment_SHORT", "short".to_string(), Duration::from_secs(1))
        .await
        .unwrap();
    assert!(store.get("payment_SHORT").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(store.get("payment_SHORT").await.unwrap(), None);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_expired_keys_are_pruned_from_index() {
    let (store, pool) = setup_store(5).await;

    store
        .put("payment_GONE", "gone".to_string(), Duration::from_secs(1))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2100)).await;
    store
        .put("payment_KEPT", "kept".to_string(), Duration::from_secs(1))
        .await
        .unwrap();

    let keys = indexed_keys(&pool, &store).await;
    assert_eq!(keys.len(), 1);
    assert!(keys[0].ends_with("payment_KEPT"));
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_cap_evicts_oldest_writes() {
    let (store, pool) = setup_store(2).await;

    for key in ["payment_1", "payment_2", "payment_3", "payment_4"] {
        store.put(key, key.to_string(), HOUR).await.unwrap();
        pause_between_writes().await;
    }

    assert_eq!(store.get("payment_1").await.unwrap(), None);
    assert_eq!(store.get("payment_2").await.unwrap(), None);
    assert!(store.get("payment_3").await.unwrap().is_some());
    assert!(store.get("payment_4").await.unwrap().is_some());
    assert_eq!(indexed_keys(&pool, &store).await.len(), 2);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_rewrite_refreshes_position() {
    let (store, _pool) = setup_store(2).await;

    store.put("current_payment", "a".to_string(), HOUR).await.unwrap();
    pause_between_writes().await;
    store.put("payment_1", "1".to_string(), HOUR).await.unwrap();
    pause_between_writes().await;
    store.put("current_payment", "b".to_string(), HOUR).await.unwrap();
    pause_between_writes().await;
    store.put("payment_2", "2".to_string(), HOUR).await.unwrap();

    assert_eq!(store.get("payment_1").await.unwrap(), None);
    assert_eq!(
        store.get("current_payment").await.unwrap(),
        Some("b".to_string())
    );
}
