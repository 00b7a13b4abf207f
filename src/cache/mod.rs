//! Pending-receipt snapshot storage
//!
//! Right before the user is sent to hosted checkout, a denormalized copy of
//! what was submitted is written here under `payment_{reference}` and under
//! a fixed "current" slot. After the redirect back, the receipt screen can
//! render from it without waiting on the backend. Entries expire after a
//! TTL and stores cap their size, evicting the oldest entries first.

pub mod error;
pub mod file;
pub mod keys;
pub mod memory;
#[cfg(feature = "cache")]
pub mod redis;

use crate::backend::types::{ExamId, PaymentKind, PaymentMethod, StudentFeeBreakdown, StudentId};
use crate::config::{StoreBackend, StoreConfig};
use crate::logging::mask_reference;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use error::{StoreError, StoreResult};
pub use file::FileSnapshotStore;
pub use keys::{PaymentKey, CURRENT_PAYMENT_KEY};
pub use memory::MemorySnapshotStore;
#[cfg(feature = "cache")]
pub use self::redis::RedisSnapshotStore;

/// Key-value storage for JSON-encoded snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Build the configured store.
pub async fn build_store(config: &StoreConfig) -> StoreResult<Arc<dyn SnapshotStore>> {
    match config.backend {
        StoreBackend::File => {
            let store = FileSnapshotStore::new(&config.dir, config.max_entries);
            info!(path = %store.path().display(), "using file receipt store");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            info!(max_entries = config.max_entries, "using in-memory receipt store");
            Ok(Arc::new(MemorySnapshotStore::new(config.max_entries)))
        }
        #[cfg(feature = "cache")]
        StoreBackend::Redis => {
            let redis_config = self::redis::RedisStoreConfig {
                redis_url: config.redis_url.clone(),
                key_prefix: config.key_prefix.clone(),
                max_entries: config.max_entries,
                ..Default::default()
            };
            Ok(Arc::new(RedisSnapshotStore::connect(&redis_config).await?))
        }
        #[cfg(not(feature = "cache"))]
        StoreBackend::Redis => Err(StoreError::NotCompiled {
            backend: "redis",
            feature: "cache",
        }),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotStudent {
    pub student_id: StudentId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub breakdown: Option<StudentFeeBreakdown>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotExamLine {
    pub exam_id: ExamId,
    pub exam_name: String,
    pub amount_paid: Decimal,
    pub include_add_on: bool,
    pub add_on_cost: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingReceiptSnapshot {
    pub snapshot_id: Uuid,
    pub reference: String,
    pub kind: PaymentKind,
    pub parent_id: String,
    pub created_at: DateTime<Utc>,
    pub total_amount: Decimal,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub students: Vec<SnapshotStudent>,
    #[serde(default)]
    pub exams: Vec<SnapshotExamLine>,
}

/// Reads and writes snapshots under their reference and the current slot.
#[derive(Clone)]
pub struct PendingReceipts {
    store: Arc<dyn SnapshotStore>,
    ttl: Duration,
}

impl PendingReceipts {
    pub fn new(store: Arc<dyn SnapshotStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn save(&self, snapshot: &PendingReceiptSnapshot) -> StoreResult<()> {
        if snapshot.reference.trim().is_empty() {
            return Err(StoreError::InvalidReference(snapshot.reference.clone()));
        }
        let encoded = serde_json::to_string(snapshot)?;
        let key = PaymentKey::new(&snapshot.reference).to_string();
        self.store.put(&key, encoded.clone(), self.ttl).await?;
        self.store.put(CURRENT_PAYMENT_KEY, encoded, self.ttl).await?;
        debug!(
            reference = %mask_reference(&snapshot.reference),
            "pending receipt snapshot stored"
        );
        Ok(())
    }

    /// Snapshot for `reference`, falling back to the current slot when it
    /// belongs to the same reference.
    pub async fn load(&self, reference: &str) -> StoreResult<Option<PendingReceiptSnapshot>> {
        let key = PaymentKey::new(reference).to_string();
        if let Some(snapshot) = self.decode(&key).await? {
            return Ok(Some(snapshot));
        }
        Ok(self
            .decode(CURRENT_PAYMENT_KEY)
            .await?
            .filter(|snapshot| snapshot.reference == reference))
    }

    pub async fn current(&self) -> StoreResult<Option<PendingReceiptSnapshot>> {
        self.decode(CURRENT_PAYMENT_KEY).await
    }

    /// Delete the snapshot for `reference`, and the current slot if it
    /// points at the same payment.
    pub async fn clear(&self, reference: &str) -> StoreResult<()> {
        self.store
            .delete(&PaymentKey::new(reference).to_string())
            .await?;
        let current_matches = self
            .decode(CURRENT_PAYMENT_KEY)
            .await?
            .map_or(false, |snapshot| snapshot.reference == reference);
        if current_matches {
            self.store.delete(CURRENT_PAYMENT_KEY).await?;
        }
        Ok(())
    }

    async fn decode(&self, key: &str) -> StoreResult<Option<PendingReceiptSnapshot>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!(key = %key, error = %e, "dropping unreadable receipt snapshot");
                self.store.delete(key).await?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_snapshot(reference: &str) -> PendingReceiptSnapshot {
    use crate::backend::types::{FeeItem, FeeItems};

    PendingReceiptSnapshot {
        snapshot_id: Uuid::new_v4(),
        reference: reference.to_string(),
        kind: PaymentKind::SchoolFees,
        parent_id: "parent-1".to_string(),
        created_at: Utc::now(),
        total_amount: Decimal::new(7_500_050, 2),
        payment_method: PaymentMethod::Card,
        description: Some("Second term fees".to_string()),
        students: vec![SnapshotStudent {
            student_id: 1,
            name: Some("Ada Obi".to_string()),
            breakdown: Some(StudentFeeBreakdown {
                student_id: 1,
                student_name: Some("Ada Obi".to_string()),
                fees: FeeItems(vec![
                    FeeItem {
                        code: "tuition".to_string(),
                        amount: Decimal::from(70_000),
                    },
                    FeeItem {
                        code: "ict".to_string(),
                        amount: Decimal::new(500_050, 2),
                    },
                ]),
                clubs: vec![],
                subtotal: Decimal::new(7_500_050, 2),
                discount_amount: Decimal::ZERO,
                discount_percentage: Decimal::ZERO,
                percentage_discount_amount: Decimal::ZERO,
                final_amount: Decimal::new(7_500_050, 2),
                student_fee_ids: vec![12],
            }),
        }],
        exams: vec![SnapshotExamLine {
            exam_id: 4,
            exam_name: "IGCSE Biology".to_string(),
            amount_paid: Decimal::from(20_000),
            include_add_on: true,
            add_on_cost: Decimal::from(5_000),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipts() -> (PendingReceipts, Arc<MemorySnapshotStore>) {
        let store = Arc::new(MemorySnapshotStore::new(10));
        (
            PendingReceipts::new(store.clone(), Duration::from_secs(3600)),
            store,
        )
    }

    #[tokio::test]
    async fn snapshot_round_trips_field_for_field() {
        let (receipts, _) = receipts();
        let snapshot = sample_snapshot("REF-0001");
        receipts.save(&snapshot).await.expect("save should succeed");

        let loaded = receipts
            .load("REF-0001")
            .await
            .expect("load should succeed")
            .expect("snapshot should exist");
        assert_eq!(loaded, snapshot);
        assert_eq!(
            receipts.current().await.expect("load should succeed"),
            Some(snapshot)
        );
    }

    #[tokio::test]
    async fn falls_back_to_current_slot_for_same_reference_only() {
        let (receipts, store) = receipts();
        receipts
            .save(&sample_snapshot("REF-A"))
            .await
            .expect("save should succeed");
        store
            .delete(&PaymentKey::new("REF-A").to_string())
            .await
            .expect("delete should succeed");

        assert!(receipts.load("REF-A").await.unwrap().is_some());
        assert!(receipts.load("REF-B").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_keeps_current_slot_of_newer_payment() {
        let (receipts, _) = receipts();
        receipts.save(&sample_snapshot("OLD")).await.unwrap();
        receipts.save(&sample_snapshot("NEW")).await.unwrap();

        receipts.clear("OLD").await.expect("clear should succeed");
        assert!(receipts.load("OLD").await.unwrap().is_none());
        assert_eq!(
            receipts.current().await.unwrap().map(|s| s.reference),
            Some("NEW".to_string())
        );

        receipts.clear("NEW").await.expect("clear should succeed");
        assert!(receipts.current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreadable_snapshot_is_dropped() {
        let (receipts, store) = receipts();
        store
            .put("payment_BROKEN", "{not json".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(receipts.load("BROKEN").await.unwrap().is_none());
        assert!(store.get("payment_BROKEN").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn builds_memory_store_from_config() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            ..Default::default()
        };
        let store = build_store(&config).await.expect("memory store should build");
        let receipts = PendingReceipts::new(store, Duration::from_secs(60));
        receipts.save(&sample_snapshot("REF-M")).await.unwrap();
        assert!(receipts.load("REF-M").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn default_store_keeps_snapshots_across_runs() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StoreConfig {
            dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let snapshot = sample_snapshot("REF-P");

        let submitting_run = PendingReceipts::new(
            build_store(&config).await.expect("file store should build"),
            config.ttl,
        );
        submitting_run.save(&snapshot).await.unwrap();
        drop(submitting_run);

        let verifying_run = PendingReceipts::new(
            build_store(&config).await.expect("file store should build"),
            config.ttl,
        );
        assert_eq!(verifying_run.load("REF-P").await.unwrap(), Some(snapshot));

        verifying_run.clear("REF-P").await.unwrap();
        let next_run = PendingReceipts::new(build_store(&config).await.unwrap(), config.ttl);
        assert!(next_run.current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_reference_is_rejected() {
        let (receipts, _) = receipts();
        let result = receipts.save(&sample_snapshot("  ")).await;
        assert!(matches!(result, Err(StoreError::InvalidReference(_))));
    }
}
