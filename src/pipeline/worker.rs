//! Worker loop.
//!
//! Each pipeline runs exactly one worker task. It pops a target id, re-reads
//! the durable record, and drives it to a terminal status:
//!
//! ```text
//! pop -> get record -> Generating -> find target -> generate | fallback
//!     -> Completed(output_ref) | Failed(error) -> completion hook
//! ```
//!
//! One item failing never stops the loop. Store calls are retried with a
//! short backoff; if the store stays unreachable the id goes back on the
//! queue after `requeue_delay`. A shutdown that arrives during a generation
//! call abandons the item; its record stays `Generating` and the next
//! recovery sweep picks it up once it is stale.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::kind::AssetKind;
use super::queue::DedupQueue;
use super::record::GenerationStatus;
use super::store::RecordStore;
use super::traits::{
    AssetOutput, CompletionHook, FallbackGenerator, Generator, Target, TargetRepository,
};
use crate::error::GeneratorError;
use crate::metrics::MetricsCollector;
use crate::storage::DatabaseError;

/// Attempts per store call before the item is requeued.
const STORE_ATTEMPTS: u32 = 3;
/// Backoff after the first failed store call; doubles per attempt.
const STORE_BACKOFF: Duration = Duration::from_millis(100);

/// Statistics about one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Items popped from the queue.
    pub processed: u64,
    /// Items written `Completed` by the primary generator.
    pub completed: u64,
    /// Items written `Completed` from the fallback.
    pub fallbacks: u64,
    /// Items written `Failed`.
    pub failed: u64,
    /// Items dropped because the record was gone or already completed.
    pub skipped: u64,
    /// Items left `Generating` by a shutdown.
    pub abandoned: u64,
    /// Items put back on the queue because the store kept failing.
    pub requeued: u64,
}

impl WorkerStats {
    /// Items that reached a terminal status.
    pub fn finished(&self) -> u64 {
        self.completed + self.fallbacks + self.failed
    }
}

/// Shared state for tracking worker statistics.
#[derive(Default)]
pub(crate) struct SharedWorkerStats {
    processed: AtomicU64,
    completed: AtomicU64,
    fallbacks: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    abandoned: AtomicU64,
    requeued: AtomicU64,
}

impl SharedWorkerStats {
    fn record(&self, outcome: ItemOutcome) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        let counter = match outcome {
            ItemOutcome::Completed => &self.completed,
            ItemOutcome::Fallback => &self.fallbacks,
            ItemOutcome::Failed => &self.failed,
            ItemOutcome::Skipped => &self.skipped,
            ItemOutcome::Abandoned => &self.abandoned,
            ItemOutcome::Requeued => &self.requeued,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            processed: self.processed.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            fallbacks: self.fallbacks.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            abandoned: self.abandoned.load(Ordering::SeqCst),
            requeued: self.requeued.load(Ordering::SeqCst),
        }
    }
}

/// How one queue item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemOutcome {
    Completed,
    Fallback,
    Failed,
    Skipped,
    Abandoned,
    Requeued,
}

impl ItemOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ItemOutcome::Completed => "completed",
            ItemOutcome::Fallback => "fallback",
            ItemOutcome::Failed => "failed",
            ItemOutcome::Skipped => "skipped",
            ItemOutcome::Abandoned => "abandoned",
            ItemOutcome::Requeued => "requeued",
        }
    }
}

/// Where an output came from.
enum Produced<O> {
    Primary(O),
    Fallback(O),
}

/// The single consumer of one pipeline's queue.
pub(crate) struct Worker<T: Target, O: AssetOutput> {
    pub(crate) kind: AssetKind,
    pub(crate) store: RecordStore,
    pub(crate) queue: Arc<DedupQueue>,
    pub(crate) targets: Arc<dyn TargetRepository<T>>,
    pub(crate) generator: Arc<dyn Generator<T, O>>,
    pub(crate) fallback: Arc<dyn FallbackGenerator<T, O>>,
    pub(crate) hook: Option<Arc<dyn CompletionHook<T, O>>>,
    pub(crate) generation_timeout: Duration,
    pub(crate) fallback_on_error: bool,
    pub(crate) requeue_delay: Duration,
    pub(crate) stats: Arc<SharedWorkerStats>,
    pub(crate) metrics: MetricsCollector,
}

impl<T: Target, O: AssetOutput> Worker<T, O> {
    /// Main worker loop. Returns when a shutdown signal arrives or the
    /// sender is dropped.
    pub(crate) async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(kind = %self.kind, generator = self.generator.name(), "Worker started");

        loop {
            let target_id = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(kind = %self.kind, "Worker received shutdown signal");
                    break;
                }
                target_id = self.queue.pop() => target_id,
            };

            let start_time = Instant::now();
            let outcome = self.process(target_id, &mut shutdown_rx).await;
            self.stats.record(outcome);
            self.metrics
                .record_generation(self.kind, outcome.as_str(), start_time.elapsed());

            if outcome == ItemOutcome::Abandoned {
                warn!(
                    kind = %self.kind,
                    target_id = target_id,
                    "Shutdown during generation, record left for the recovery sweep"
                );
                break;
            }
        }

        info!(kind = %self.kind, "Worker stopped");
    }

    /// Drives one target to a terminal status.
    async fn process(
        &self,
        target_id: i64,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> ItemOutcome {
        let kind = self.kind;

        let record = match self
            .with_retry(target_id, "read record", || self.store.get(target_id))
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(kind = %kind, target_id = target_id, "Record gone, skipping");
                return ItemOutcome::Skipped;
            }
            Err(_) => return self.requeue_later(target_id),
        };
        if record.status == Some(GenerationStatus::Completed) {
            debug!(kind = %kind, target_id = target_id, "Already completed, skipping");
            return ItemOutcome::Skipped;
        }

        match self
            .with_retry(target_id, "mark generating", || {
                self.store.mark_generating(target_id)
            })
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(kind = %kind, target_id = target_id, "Completed or gone before claim, skipping");
                return ItemOutcome::Skipped;
            }
            Err(_) => return self.requeue_later(target_id),
        }

        info!(kind = %kind, target_id = target_id, "Processing");

        let target = match self.targets.find(target_id).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                return self
                    .write_failed(target_id, &format!("{} target {} not found", kind, target_id))
                    .await;
            }
            Err(e) => {
                return self
                    .write_failed(target_id, &format!("failed to load target: {}", e))
                    .await;
            }
        };

        self.metrics.inc_active(kind);
        let produced = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => None,
            produced = self.produce(&target) => Some(produced),
        };
        self.metrics.dec_active(kind);

        let Some(produced) = produced else {
            return ItemOutcome::Abandoned;
        };

        let (output, outcome) = match produced {
            Ok(Produced::Primary(output)) => (output, ItemOutcome::Completed),
            Ok(Produced::Fallback(output)) => (output, ItemOutcome::Fallback),
            Err(e) => return self.write_failed(target_id, &e.to_string()).await,
        };

        let output_ref = match output.output_ref() {
            Ok(output_ref) => output_ref,
            Err(e) => {
                return self
                    .write_failed(target_id, &format!("failed to encode output: {}", e))
                    .await;
            }
        };

        match self
            .with_retry(target_id, "mark completed", || {
                self.store.update_status(
                    target_id,
                    GenerationStatus::Completed,
                    Some(&output_ref),
                    None,
                )
            })
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(kind = %kind, target_id = target_id, "Record deleted during generation");
                return ItemOutcome::Skipped;
            }
            Err(e) => return self.write_failed(target_id, &e.to_string()).await,
        }

        info!(
            kind = %kind,
            target_id = target_id,
            fallback = outcome == ItemOutcome::Fallback,
            "Generation completed"
        );

        if let Some(hook) = &self.hook {
            if let Err(e) = hook.on_completed(&target, &output).await {
                warn!(kind = %kind, target_id = target_id, error = %e, "Completion hook failed");
            }
        }

        outcome
    }

    /// Calls the generator, or the fallback when it is unavailable.
    async fn produce(&self, target: &T) -> Result<Produced<O>, GeneratorError> {
        if !self.generator.is_available().await {
            debug!(
                kind = %self.kind,
                target_id = target.id(),
                generator = self.generator.name(),
                "Generator unavailable, using fallback"
            );
            return Ok(Produced::Fallback(self.fallback.build(target)));
        }

        let result =
            match tokio::time::timeout(self.generation_timeout, self.generator.generate(target))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(GeneratorError::Timeout(self.generation_timeout)),
            };

        match result {
            Ok(output) => Ok(Produced::Primary(output)),
            Err(GeneratorError::Unavailable(reason)) => {
                debug!(kind = %self.kind, target_id = target.id(), reason = %reason, "Generator became unavailable, using fallback");
                Ok(Produced::Fallback(self.fallback.build(target)))
            }
            Err(e) if self.fallback_on_error => {
                warn!(
                    kind = %self.kind,
                    target_id = target.id(),
                    error = %e,
                    "Generator failed, using fallback"
                );
                Ok(Produced::Fallback(self.fallback.build(target)))
            }
            Err(e) => Err(e),
        }
    }

    async fn write_failed(&self, target_id: i64, message: &str) -> ItemOutcome {
        warn!(kind = %self.kind, target_id = target_id, error = message, "Generation failed");
        match self
            .with_retry(target_id, "mark failed", || {
                self.store
                    .update_status(target_id, GenerationStatus::Failed, None, Some(message))
            })
            .await
        {
            Ok(true) => ItemOutcome::Failed,
            Ok(false) => ItemOutcome::Skipped,
            // Still `Generating`; the next attempt claims it again.
            Err(_) => self.requeue_later(target_id),
        }
    }

    /// Runs a store call up to `STORE_ATTEMPTS` times with doubling backoff.
    async fn with_retry<R, F, Fut>(
        &self,
        target_id: i64,
        action: &str,
        mut call: F,
    ) -> Result<R, DatabaseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, DatabaseError>>,
    {
        let mut backoff = STORE_BACKOFF;
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < STORE_ATTEMPTS => {
                    warn!(
                        kind = %self.kind,
                        target_id = target_id,
                        attempt = attempt,
                        error = %e,
                        "Store call failed, retrying: {}",
                        action
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        kind = %self.kind,
                        target_id = target_id,
                        error = %e,
                        "Store call failed: {}",
                        action
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Puts the id back on the queue once `requeue_delay` has passed.
    fn requeue_later(&self, target_id: i64) -> ItemOutcome {
        let queue = Arc::clone(&self.queue);
        let delay = self.requeue_delay;
        let kind = self.kind;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(target_id).await;
            debug!(kind = %kind, target_id = target_id, "Requeued after store failure");
        });
        ItemOutcome::Requeued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_stats_snapshot() {
        let stats = SharedWorkerStats::default();
        stats.record(ItemOutcome::Completed);
        stats.record(ItemOutcome::Fallback);
        stats.record(ItemOutcome::Failed);
        stats.record(ItemOutcome::Skipped);
        stats.record(ItemOutcome::Requeued);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.processed, 5);
        assert_eq!(snapshot.finished(), 3);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.requeued, 1);
        assert_eq!(snapshot.abandoned, 0);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(ItemOutcome::Fallback.as_str(), "fallback");
        assert_eq!(ItemOutcome::Abandoned.as_str(), "abandoned");
    }
}
