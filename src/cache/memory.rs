//! In-process snapshot store

use super::error::StoreResult;
use super::SnapshotStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

/// Bounded map with per-entry expiry. When full, the least recently
/// written entry is evicted.
#[derive(Debug)]
pub struct MemorySnapshotStore {
    inner: Mutex<Inner>,
    max_entries: usize,
}

impl MemorySnapshotStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_entries: max_entries.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        let mut inner = self.inner.lock().await;
        purge_expired(&mut inner, Instant::now());
        inner.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn purge_expired(inner: &mut Inner, now: Instant) {
    inner.entries.retain(|_, entry| entry.expires_at > now);
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        purge_expired(&mut inner, now);

        if !inner.entries.contains_key(key) {
            while inner.entries.len() >= self.max_entries {
                let oldest = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.seq)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(oldest) => {
                        debug!(key = %oldest, "evicting oldest receipt snapshot");
                        inner.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
                seq,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let expired = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(key);
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.lock().await.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemorySnapshotStore::new(5);
        store
            .put("payment_A", "a".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("payment_A").await.unwrap(), Some("a".to_string()));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get("payment_A").await.unwrap(), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn evicts_oldest_when_full() {
        let store = MemorySnapshotStore::new(2);
        store.put("payment_1", "1".to_string(), HOUR).await.unwrap();
        store.put("payment_2", "2".to_string(), HOUR).await.unwrap();
        store.put("payment_3", "3".to_string(), HOUR).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert_eq!(store.get("payment_1").await.unwrap(), None);
        assert_eq!(store.get("payment_3").await.unwrap(), Some("3".to_string()));
    }

    #[tokio::test]
    async fn rewriting_a_key_refreshes_its_age() {
        let store = MemorySnapshotStore::new(2);
        store.put("current_payment", "a".to_string(), HOUR).await.unwrap();
        store.put("payment_1", "1".to_string(), HOUR).await.unwrap();
        store.put("current_payment", "b".to_string(), HOUR).await.unwrap();
        store.put("payment_2", "2".to_string(), HOUR).await.unwrap();

        assert_eq!(store.get("payment_1").await.unwrap(), None);
        assert_eq!(
            store.get("current_payment").await.unwrap(),
            Some("b".to_string())
        );
    }
}
