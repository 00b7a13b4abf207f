//! Redis-backed snapshot store
//!
//! Values are written with `SET .. EX`. A sorted set scored by write time
//! tracks every key so the store can stay under `max_entries` by dropping
//! the oldest writes.

use super::error::{StoreError, StoreResult};
use super::keys::namespaced;
use super::SnapshotStore;
use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Redis connection pool type alias
pub type RedisPool = Pool<RedisConnectionManager>;

const INDEX_KEY: &str = "snapshot_index";

#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    pub redis_url: String,
    pub key_prefix: String,
    pub max_entries: usize,
    pub max_connections: u32,
    pub connection_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "edupay".to_string(),
            max_entries: 50,
            max_connections: 4,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

/// Initialize the Redis connection pool
pub async fn init_pool(config: &RedisStoreConfig) -> StoreResult<RedisPool> {
    info!(
        max_connections = config.max_connections,
        "initializing Redis receipt store pool"
    );

    let manager = RedisConnectionManager::new(config.redis_url.as_str()).map_err(|e| {
        error!("Failed to create Redis connection manager: {}", e);
        StoreError::Unavailable(e.to_string())
    })?;

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .connection_timeout(config.connection_timeout)
        .build(manager)
        .await
        .map_err(|e| {
            error!("Failed to build Redis connection pool: {}", e);
            StoreError::Unavailable(e.to_string())
        })?;

    if let Err(e) = ping(&pool).await {
        warn!("Initial Redis connection test failed, but continuing: {}", e);
    }

    Ok(pool)
}

async fn ping(pool: &RedisPool) -> StoreResult<()> {
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
    Ok(())
}

pub struct RedisSnapshotStore {
    pool: RedisPool,
    key_prefix: String,
    max_entries: usize,
}

impl RedisSnapshotStore {
    pub fn new(pool: RedisPool, key_prefix: impl Into<String>, max_entries: usize) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.into(),
            max_entries: max_entries.max(1),
        }
    }

    pub async fn connect(config: &RedisStoreConfig) -> StoreResult<Self> {
        let pool = init_pool(config).await?;
        Ok(Self::new(pool, config.key_prefix.clone(), config.max_entries))
    }

    fn key(&self, key: &str) -> String {
        namespaced(&self.key_prefix, key)
    }

    /// Sorted set of stored keys scored by write time in milliseconds.
    pub fn index_key(&self) -> String {
        namespaced(&self.key_prefix, INDEX_KEY)
    }

    async fn enforce_cap<C>(&self, conn: &mut C) -> StoreResult<()>
    where
        C: redis::aio::ConnectionLike + Send,
    {
        let index = self.index_key();
        let count: usize = redis::cmd("ZCARD").arg(&index).query_async(conn).await?;
        if count <= self.max_entries {
            return Ok(());
        }

        let excess = (count - self.max_entries) as isize;
        let stale: Vec<String> = redis::cmd("ZRANGE")
            .arg(&index)
            .arg(0)
            .arg(excess - 1)
            .query_async(conn)
            .await?;
        if stale.is_empty() {
            return Ok(());
        }

        debug!(evicted = stale.len(), "evicting oldest receipt snapshots");
        let _: () = redis::cmd("DEL").arg(&stale).query_async(conn).await?;
        let _: () = redis::cmd("ZREM")
            .arg(&index)
            .arg(&stale)
            .query_async(conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for RedisSnapshotStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        let full_key = self.key(key);
        let mut conn = self.pool.get().await?;
        let ttl_secs = ttl.as_secs().max(1);

        let _: () = redis::cmd("SET")
            .arg(&full_key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut *conn)
            .await?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let index = self.index_key();
        // Index members whose values have already expired
        let _: () = redis::cmd("ZREMRANGEBYSCORE")
            .arg(&index)
            .arg("-inf")
            .arg(now_ms - (ttl_secs as i64) * 1000)
            .query_async(&mut *conn)
            .await?;
        let _: () = redis::cmd("ZADD")
            .arg(&index)
            .arg(now_ms)
            .arg(&full_key)
            .query_async(&mut *conn)
            .await?;

        self.enforce_cap(&mut *conn).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut *conn)
            .await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let full_key = self.key(key);
        let mut conn = self.pool.get().await?;
        let _: () = redis::cmd("DEL")
            .arg(&full_key)
            .query_async(&mut *conn)
            .await?;
        let _: () = redis::cmd("ZREM")
            .arg(self.index_key())
            .arg(&full_key)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }
}
