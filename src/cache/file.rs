//! Snapshot store kept in a JSON file, so a snapshot written before the
//! checkout redirect is still there when a later process verifies it.

use super::error::{StoreError, StoreResult};
use super::SnapshotStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const STORE_FILE_NAME: &str = "pending_receipts.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredEntries {
    next_seq: u64,
    entries: HashMap<String, StoredEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    value: String,
    expires_at: DateTime<Utc>,
    seq: u64,
}

impl StoredEntries {
    /// Drops expired entries and reports whether anything was removed.
    fn purge_expired(&mut self, now: DateTime<Utc>) -> bool {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.entries.len() != before
    }
}

/// Same expiry and oldest-first cap as the in-memory store, with every
/// change written through to `{dir}/pending_receipts.json`.
#[derive(Debug)]
pub struct FileSnapshotStore {
    path: PathBuf,
    max_entries: usize,
    lock: Mutex<()>,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self {
            path: dir.into().join(STORE_FILE_NAME),
            max_entries: max_entries.max(1),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> StoreResult<StoredEntries> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StoredEntries::default()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "discarding unreadable receipt store file"
                );
                Ok(StoredEntries::default())
            }
        }
    }

    /// Replace the file through a sibling temp file so a crash mid-write
    /// leaves the previous contents intact.
    async fn write(&self, entries: &StoredEntries) -> StoreResult<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::io(dir, e))?;
        }
        let encoded = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, encoded)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or(StoreError::TtlOutOfRange(ttl))?;

        let _guard = self.lock.lock().await;
        let mut stored = self.read().await?;
        stored.purge_expired(now);

        if !stored.entries.contains_key(key) {
            while stored.entries.len() >= self.max_entries {
                let oldest = stored
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.seq)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(oldest) => {
                        debug!(key = %oldest, "evicting oldest receipt snapshot");
                        stored.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }

        let seq = stored.next_seq;
        stored.next_seq += 1;
        stored.entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                expires_at,
                seq,
            },
        );
        self.write(&stored).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let _guard = self.lock.lock().await;
        let mut stored = self.read().await?;
        if stored.purge_expired(Utc::now()) {
            self.write(&stored).await?;
        }
        Ok(stored.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut stored = self.read().await?;
        let purged = stored.purge_expired(Utc::now());
        if stored.entries.remove(key).is_some() || purged {
            self.write(&stored).await?;
        }
        Ok(())
    }
}
