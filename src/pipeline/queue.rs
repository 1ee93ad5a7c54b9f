//! In-memory deduplicating work queue.
//!
//! Each pipeline owns one `DedupQueue` of target ids consumed by a single
//! worker. Entries are wake-up hints: the worker re-reads the durable record
//! before acting, so nothing but the id is carried.
//!
//! # Semantics
//!
//! - FIFO in order of first enqueue
//! - An id already waiting is not added again (`enqueue` returns `false`)
//! - Membership is released when the id is popped, so a target can be queued
//!   again while the worker is processing it
//! - Unbounded; growth is bounded by the number of distinct targets
//!
//! Nothing here is persisted. After a restart the queue is rebuilt from
//! `generation_records` by the recovery sweep.

use std::collections::{HashSet, VecDeque};

use tokio::sync::{Mutex, Notify};

use super::kind::AssetKind;
use crate::metrics::MetricsCollector;

#[derive(Default)]
struct QueueState {
    items: VecDeque<i64>,
    members: HashSet<i64>,
}

/// FIFO queue of target ids with membership-aware enqueue.
pub struct DedupQueue {
    kind: AssetKind,
    state: Mutex<QueueState>,
    notify: Notify,
    metrics: MetricsCollector,
}

impl DedupQueue {
    pub fn new(kind: AssetKind) -> Self {
        Self {
            kind,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    /// Adds `target_id` unless it is already waiting.
    ///
    /// Returns `true` if the id was added.
    pub async fn enqueue(&self, target_id: i64) -> bool {
        let depth = {
            let mut state = self.state.lock().await;
            if !state.members.insert(target_id) {
                return false;
            }
            state.items.push_back(target_id);
            state.items.len()
        };

        self.notify.notify_one();
        self.metrics.record_enqueue(self.kind, depth);
        tracing::debug!(kind = %self.kind, target_id = target_id, depth = depth, "Enqueued");
        true
    }

    /// Waits for the next id.
    ///
    /// Cancel safe: dropping the future before it resolves never loses an id,
    /// so it can sit in a `tokio::select!` next to a shutdown signal.
    pub async fn pop(&self) -> i64 {
        loop {
            if let Some(target_id) = self.try_pop().await {
                return target_id;
            }
            // `notify_one` leaves a permit when nobody is waiting, so an
            // enqueue between `try_pop` and here is not missed.
            self.notify.notified().await;
        }
    }

    /// Takes the next id without waiting.
    pub async fn try_pop(&self) -> Option<i64> {
        let (target_id, depth) = {
            let mut state = self.state.lock().await;
            let target_id = state.items.pop_front()?;
            state.members.remove(&target_id);
            (target_id, state.items.len())
        };

        self.metrics.update_queue_depth(self.kind, depth);
        Some(target_id)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }

    /// Returns true if `target_id` is waiting (not yet popped).
    pub async fn contains(&self, target_id: i64) -> bool {
        self.state.lock().await.members.contains(&target_id)
    }

    /// Waiting ids in pop order.
    pub async fn snapshot(&self) -> Vec<i64> {
        self.state.lock().await.items.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_enqueue_dedups_while_waiting() {
        let queue = DedupQueue::new(AssetKind::Quiz);
        assert!(queue.enqueue(1).await);
        assert!(!queue.enqueue(1).await);
        assert!(queue.enqueue(2).await);
        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.snapshot().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_pop_is_fifo_and_releases_membership() {
        let queue = DedupQueue::new(AssetKind::Recap);
        queue.enqueue(3).await;
        queue.enqueue(1).await;
        queue.enqueue(2).await;

        assert_eq!(queue.pop().await, 3);
        assert!(!queue.contains(3).await);
        // Popped ids may be queued again.
        assert!(queue.enqueue(3).await);
        assert_eq!(queue.snapshot().await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_try_pop_empty() {
        let queue = DedupQueue::new(AssetKind::Portrait);
        assert!(queue.is_empty().await);
        assert_eq!(queue.try_pop().await, None);
    }

    #[tokio::test]
    async fn test_pop_waits_for_enqueue() {
        let queue = Arc::new(DedupQueue::new(AssetKind::Illustration));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.enqueue(42).await;
        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("pop resolves")
            .expect("task joins");
        assert_eq!(popped, 42);
    }

    #[tokio::test]
    async fn test_cancelled_pop_loses_nothing() {
        let queue = DedupQueue::new(AssetKind::Quiz);
        let result = tokio::time::timeout(Duration::from_millis(10), queue.pop()).await;
        assert!(result.is_err());

        queue.enqueue(7).await;
        assert_eq!(queue.pop().await, 7);
    }
}
