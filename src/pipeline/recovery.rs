//! Recovery sweep.
//!
//! The queue is not persisted, so after a crash the only record of pending
//! work is the `generation_records` table. The sweep rebuilds the queue from
//! it:
//!
//! 1. `Generating` rows older than the stale threshold are reset to `Pending`
//! 2. `Pending` rows are collected as they are
//! 3. NULL-status rows are normalized to `Pending`
//!
//! and all of them are enqueued through the dedup queue. It runs when a
//! pipeline starts and whenever a batch wait stops seeing progress.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::kind::AssetKind;
use super::queue::DedupQueue;
use super::record::{GenerationRecord, GenerationStatus};
use super::store::RecordStore;
use crate::metrics::MetricsCollector;
use crate::storage::DatabaseError;

/// When a `Generating` record counts as abandoned.
///
/// Shared by the startup sweep and the stall-triggered sweep; stall detection
/// only decides when to sweep, this threshold decides what is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    pub stale_threshold: Duration,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(15 * 60),
        }
    }
}

impl StalenessPolicy {
    pub fn new(stale_threshold: Duration) -> Self {
        Self { stale_threshold }
    }

    /// Records last updated strictly before this instant are stale.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let threshold = chrono::Duration::from_std(self.stale_threshold)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        now - threshold
    }

    /// Returns true for a `Generating` record older than the threshold.
    pub fn is_stale(&self, record: &GenerationRecord, now: DateTime<Utc>) -> bool {
        record.status == Some(GenerationStatus::Generating) && record.updated_at < self.cutoff(now)
    }
}

/// What one sweep did for one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySummary {
    pub kind: Option<AssetKind>,
    /// Stale `Generating` records reset to `Pending`.
    pub reset_stale: usize,
    /// Records that were already `Pending`.
    pub pending: usize,
    /// NULL-status records normalized to `Pending`.
    pub normalized_legacy: usize,
    /// Ids newly added to the queue.
    pub enqueued: usize,
}

impl RecoverySummary {
    fn for_kind(kind: AssetKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    /// Records the sweep found work for.
    pub fn recovered(&self) -> usize {
        self.reset_stale + self.pending + self.normalized_legacy
    }

    pub fn is_empty(&self) -> bool {
        self.recovered() == 0
    }
}

/// Sweeps one kind's records back into its queue.
pub struct RecoverySweep {
    store: RecordStore,
    queue: Arc<DedupQueue>,
    policy: StalenessPolicy,
    metrics: MetricsCollector,
}

impl RecoverySweep {
    pub fn new(store: RecordStore, queue: Arc<DedupQueue>, policy: StalenessPolicy) -> Self {
        Self {
            store,
            queue,
            policy,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn policy(&self) -> StalenessPolicy {
        self.policy
    }

    /// Runs the sweep, optionally limited to one book.
    pub async fn run(&self, book_id: Option<i64>) -> Result<RecoverySummary, DatabaseError> {
        let kind = self.store.kind();
        let mut summary = RecoverySummary::for_kind(kind);
        let mut to_enqueue = Vec::new();

        // Listed before the stale reset so reset rows are not counted twice.
        let pending = self
            .store
            .list_by_status(GenerationStatus::Pending, book_id)
            .await?;

        let cutoff = self.policy.cutoff(Utc::now());
        let stale = self
            .store
            .list_stale_in_status(GenerationStatus::Generating, cutoff, book_id)
            .await?;
        for record in stale {
            // The worker may have finished it since the listing.
            if self.store.reset_if_stale(record.target_id, cutoff).await? {
                debug!(kind = %kind, target_id = record.target_id, "Reset stale record");
                summary.reset_stale += 1;
                to_enqueue.push(record.target_id);
            }
        }

        summary.pending = pending.len();
        to_enqueue.extend(pending.iter().map(|r| r.target_id));

        for record in self.store.list_legacy(book_id).await? {
            if self.store.normalize_legacy(record.target_id).await? {
                summary.normalized_legacy += 1;
                to_enqueue.push(record.target_id);
            }
        }

        for target_id in to_enqueue {
            if self.queue.enqueue(target_id).await {
                summary.enqueued += 1;
            }
        }

        self.metrics
            .record_recovered(kind, "stale", summary.reset_stale);
        self.metrics.record_recovered(kind, "pending", summary.pending);
        self.metrics
            .record_recovered(kind, "legacy", summary.normalized_legacy);

        if !summary.is_empty() {
            info!(
                kind = %kind,
                book_id = ?book_id,
                reset_stale = summary.reset_stale,
                pending = summary.pending,
                normalized_legacy = summary.normalized_legacy,
                enqueued = summary.enqueued,
                "Recovery sweep re-enqueued records"
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    async fn setup(threshold: Duration) -> (tempfile::TempDir, RecordStore, RecoverySweep) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::open_path(&dir.path().join("sweep.db"))
            .await
            .expect("open database");
        let store = RecordStore::new(db, AssetKind::Illustration);
        let sweep = RecoverySweep::new(
            store.clone(),
            Arc::new(DedupQueue::new(AssetKind::Illustration)),
            StalenessPolicy::new(threshold),
        );
        (dir, store, sweep)
    }

    async fn force_generating(store: &RecordStore, target_id: i64, age: chrono::Duration) {
        store
            .update_status(target_id, GenerationStatus::Generating, None, None)
            .await
            .expect("generating");
        sqlx::query("UPDATE generation_records SET updated_at = ?1 WHERE target_id = ?2")
            .bind((Utc::now() - age).timestamp_millis())
            .bind(target_id)
            .execute(store.database().pool())
            .await
            .expect("backdate");
    }

    #[test]
    fn test_policy_cutoff() {
        let policy = StalenessPolicy::new(Duration::from_secs(60));
        let now = Utc::now();
        assert_eq!(policy.cutoff(now), now - chrono::Duration::seconds(60));
        assert_eq!(
            StalenessPolicy::default().stale_threshold,
            Duration::from_secs(900)
        );
    }

    #[tokio::test]
    async fn test_stale_generating_is_reset_and_enqueued_once() {
        let (_dir, store, sweep) = setup(Duration::from_secs(600)).await;
        store.create(1, 1).await.expect("create");
        force_generating(&store, 1, chrono::Duration::hours(1)).await;

        let summary = sweep.run(None).await.expect("sweep");
        assert_eq!(summary.reset_stale, 1);
        assert_eq!(summary.enqueued, 1);
        assert_eq!(
            store.get(1).await.expect("get").expect("present").status,
            Some(GenerationStatus::Pending)
        );

        // A second sweep sees it as pending, but the queue already holds it.
        let again = sweep.run(None).await.expect("sweep");
        assert_eq!(again.reset_stale, 0);
        assert_eq!(again.pending, 1);
        assert_eq!(again.enqueued, 0);
        assert_eq!(sweep.queue.snapshot().await, vec![1]);
    }

    #[tokio::test]
    async fn test_fresh_generating_is_left_alone() {
        let (_dir, store, sweep) = setup(Duration::from_secs(600)).await;
        store.create(2, 1).await.expect("create");
        force_generating(&store, 2, chrono::Duration::seconds(5)).await;

        let summary = sweep.run(None).await.expect("sweep");
        assert!(summary.is_empty());
        assert!(sweep.queue.is_empty().await);
        assert_eq!(
            store.get(2).await.expect("get").expect("present").status,
            Some(GenerationStatus::Generating)
        );
    }

    #[tokio::test]
    async fn test_pending_and_legacy_are_enqueued() {
        let (_dir, store, sweep) = setup(Duration::from_secs(600)).await;
        store.create(3, 1).await.expect("create");
        store.create(4, 1).await.expect("create");
        sqlx::query("UPDATE generation_records SET status = NULL WHERE target_id = 4")
            .execute(store.database().pool())
            .await
            .expect("legacy");
        store.create(5, 1).await.expect("create");
        store
            .update_status(5, GenerationStatus::Completed, Some("x.png"), None)
            .await
            .expect("complete");

        let summary = sweep.run(None).await.expect("sweep");
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.normalized_legacy, 1);
        assert_eq!(summary.enqueued, 2);
        assert_eq!(sweep.queue.snapshot().await, vec![3, 4]);
        assert_eq!(
            store.get(4).await.expect("get").expect("present").status,
            Some(GenerationStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_scope_limits_sweep_to_one_book() {
        let (_dir, store, sweep) = setup(Duration::from_secs(600)).await;
        store.create(6, 1).await.expect("create");
        store.create(7, 2).await.expect("create");

        let summary = sweep.run(Some(2)).await.expect("sweep");
        assert_eq!(summary.pending, 1);
        assert_eq!(sweep.queue.snapshot().await, vec![7]);
    }
}
