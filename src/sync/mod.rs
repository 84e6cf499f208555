//! Copies catalog items into the durable mirror.
//!
//! Items are classified against the mirror by content digest, and each write
//! is its own transaction: a failing item is reported while the items already
//! committed stay committed. Unchanged items are never written, so a repeated
//! run with the same input is a no-op.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{FailedItem, SyncError, SyncPartialFailure};
use crate::models::{CatalogItem, MirrorRecord, MirrorStatus, SyncResult};
use crate::traits::MirrorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Insert,
    Update,
    Unchanged,
}

fn classify(known: &HashMap<i64, String>, record: &MirrorRecord) -> Change {
    match known.get(&record.item.id) {
        None => Change::Insert,
        Some(hash) if *hash == record.content_hash => Change::Unchanged,
        Some(_) => Change::Update,
    }
}

#[derive(Clone)]
pub struct SyncReconciler {
    mirror: Arc<dyn MirrorStore>,
}

impl SyncReconciler {
    pub fn new(mirror: Arc<dyn MirrorStore>) -> Self {
        Self { mirror }
    }

    pub fn mirror(&self) -> &Arc<dyn MirrorStore> {
        &self.mirror
    }

    /// Reconciles `items` into the mirror.
    ///
    /// Returns [`SyncError::Partial`] naming every item that failed, with the
    /// counts of what did commit.
    pub async fn sync_from_remote(&self, items: &[CatalogItem]) -> Result<SyncResult, SyncError> {
        let mut known: HashMap<i64, String> = self
            .mirror
            .list_all()
            .await?
            .into_iter()
            .map(|record| (record.item.id, record.content_hash))
            .collect();

        let (mut inserted, mut updated, mut unchanged) = (0, 0, 0);
        let mut failed = Vec::new();

        for item in items {
            let record = MirrorRecord::new(item.clone());
            let change = classify(&known, &record);
            if change == Change::Unchanged {
                unchanged += 1;
                continue;
            }

            match self.mirror.upsert(&record).await {
                Ok(()) => {
                    if change == Change::Insert {
                        inserted += 1;
                    } else {
                        updated += 1;
                    }
                    known.insert(record.item.id, record.content_hash);
                }
                Err(err) => {
                    warn!("Failed to sync item {}: {}", item.id, err);
                    failed.push(FailedItem {
                        id: item.id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        // Writes already committed; a failed count must not hide them.
        let total_in_database = match self.mirror.count_all().await {
            Ok(total) => total,
            Err(err) => {
                warn!("Could not count mirrored items after sync: {}", err);
                i64::try_from(known.len()).unwrap_or(i64::MAX)
            }
        };

        let result = SyncResult {
            inserted,
            updated,
            unchanged,
            total_in_database,
            synced_at: Utc::now(),
            success: failed.is_empty(),
        };

        if failed.is_empty() {
            info!(
                "Sync complete: {} inserted, {} updated, {} unchanged, {} in mirror",
                inserted, updated, unchanged, result.total_in_database
            );
            Ok(result)
        } else {
            warn!(
                "Sync partially failed: {} committed, {} failed",
                inserted + updated,
                failed.len()
            );
            Err(SyncError::Partial(SyncPartialFailure {
                succeeded: inserted + updated,
                failed,
                result,
            }))
        }
    }

    /// Read-only health check of the mirror.
    pub async fn check_remote_status(&self) -> MirrorStatus {
        let started = Instant::now();
        let available = self.mirror.test_connection().await;
        let total_items = if available {
            self.mirror.count_all().await.ok()
        } else {
            None
        };

        MirrorStatus {
            available,
            total_items,
            latency: started.elapsed(),
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteMirror;
    use crate::error::MirrorError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn bike(id: i64, price: f64) -> CatalogItem {
        CatalogItem {
            id,
            name: format!("Bike {id}"),
            price_per_day: price,
            available: 2,
            stock_status: None,
            category: "city".into(),
            source_data: None,
        }
    }

    async fn sqlite_reconciler() -> SyncReconciler {
        SyncReconciler::new(Arc::new(SqliteMirror::in_memory().await.unwrap()))
    }

    /// Delegates to SQLite but refuses writes for chosen ids, and optionally
    /// every count.
    struct RejectingStore {
        inner: SqliteMirror,
        rejected: Mutex<HashSet<i64>>,
        count_fails: bool,
    }

    #[async_trait]
    impl MirrorStore for RejectingStore {
        async fn list_all(&self) -> Result<Vec<MirrorRecord>, MirrorError> {
            self.inner.list_all().await
        }

        async fn upsert(&self, record: &MirrorRecord) -> Result<(), MirrorError> {
            if self.rejected.lock().unwrap().contains(&record.item.id) {
                return Err(MirrorError::Unavailable("disk full".into()));
            }
            self.inner.upsert(record).await
        }

        async fn count_all(&self) -> Result<i64, MirrorError> {
            if self.count_fails {
                return Err(MirrorError::Unavailable("database is locked".into()));
            }
            self.inner.count_all().await
        }

        async fn test_connection(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn second_run_with_same_input_changes_nothing() {
        let reconciler = sqlite_reconciler().await;
        let items = vec![bike(1, 10.0), bike(2, 12.0), bike(3, 15.0)];

        let first = reconciler.sync_from_remote(&items).await.unwrap();
        assert_eq!((first.inserted, first.updated), (3, 0));
        assert_eq!(first.total_in_database, 3);

        let second = reconciler.sync_from_remote(&items).await.unwrap();
        assert_eq!((second.inserted, second.updated, second.unchanged), (0, 0, 3));
        assert!(second.success);
    }

    #[tokio::test]
    async fn changed_items_are_updated() {
        let reconciler = sqlite_reconciler().await;
        reconciler
            .sync_from_remote(&[bike(1, 10.0), bike(2, 12.0)])
            .await
            .unwrap();

        let result = reconciler
            .sync_from_remote(&[bike(1, 11.0), bike(2, 12.0), bike(4, 20.0)])
            .await
            .unwrap();

        assert_eq!((result.inserted, result.updated, result.unchanged), (1, 1, 1));
        assert_eq!(result.total_in_database, 3);
        let stored = reconciler.mirror().list_all().await.unwrap();
        assert_eq!(stored[0].item.price_per_day, 11.0);
    }

    #[tokio::test]
    async fn partial_failure_keeps_committed_items_and_names_the_rest() {
        let store = Arc::new(RejectingStore {
            inner: SqliteMirror::in_memory().await.unwrap(),
            rejected: Mutex::new(HashSet::from([2])),
            count_fails: false,
        });
        let reconciler = SyncReconciler::new(Arc::clone(&store) as Arc<dyn MirrorStore>);
        let items = vec![bike(1, 10.0), bike(2, 12.0), bike(3, 15.0)];

        let failure = match reconciler.sync_from_remote(&items).await {
            Err(SyncError::Partial(failure)) => failure,
            other => panic!("expected partial failure, got {other:?}"),
        };
        assert_eq!(failure.succeeded, 2);
        assert_eq!(failure.failed_ids(), vec![2]);
        assert_eq!(failure.result.total_in_database, 2);
        assert!(!failure.result.success);

        // Retry only the failed subset once the store recovers
        store.rejected.lock().unwrap().clear();
        let retry: Vec<_> = items
            .iter()
            .filter(|i| failure.failed_ids().contains(&i.id))
            .cloned()
            .collect();
        let result = reconciler.sync_from_remote(&retry).await.unwrap();
        assert_eq!((result.inserted, result.updated), (1, 0));
        assert_eq!(result.total_in_database, 3);
    }

    #[tokio::test]
    async fn failed_count_still_reports_committed_work() {
        let inner = SqliteMirror::in_memory().await.unwrap();
        inner.upsert(&MirrorRecord::new(bike(1, 10.0))).await.unwrap();
        let reconciler = SyncReconciler::new(Arc::new(RejectingStore {
            inner,
            rejected: Mutex::new(HashSet::from([3])),
            count_fails: true,
        }));
        let items = vec![bike(1, 10.0), bike(2, 12.0), bike(3, 15.0)];

        let failure = match reconciler.sync_from_remote(&items).await {
            Err(SyncError::Partial(failure)) => failure,
            other => panic!("expected partial failure, got {other:?}"),
        };
        assert_eq!(failure.failed_ids(), vec![3]);
        assert_eq!((failure.result.inserted, failure.result.unchanged), (1, 1));
        assert_eq!(failure.result.total_in_database, 2);

        let clean = reconciler.sync_from_remote(&items[..2]).await.unwrap();
        assert_eq!(clean.unchanged, 2);
        assert_eq!(clean.total_in_database, 2);
    }

    #[tokio::test]
    async fn status_check_reports_counts() {
        let reconciler = sqlite_reconciler().await;
        reconciler.sync_from_remote(&[bike(1, 10.0)]).await.unwrap();

        let status = reconciler.check_remote_status().await;
        assert!(status.available);
        assert_eq!(status.total_items, Some(1));

        let down = SyncReconciler::new(Arc::new(RejectingStore {
            inner: SqliteMirror::in_memory().await.unwrap(),
            rejected: Mutex::new(HashSet::new()),
            count_fails: false,
        }));
        let status = down.check_remote_status().await;
        assert!(!status.available);
        assert_eq!(status.total_items, None);
    }
}
