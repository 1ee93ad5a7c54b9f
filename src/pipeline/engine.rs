//! The generic pipeline.
//!
//! `Pipeline<T, O>` owns everything for one asset kind: record store, dedup
//! queue, request gate, recovery sweep and the worker task. Five instances
//! run side by side with independent queues and workers.
//!
//! # Example
//!
//! ```rust,ignore
//! let pipeline = Pipeline::new(
//!     AssetKind::Recap,
//!     db.clone(),
//!     PipelineParts::new(chapters, generator, fallback),
//!     PipelineSettings::default(),
//! );
//! pipeline.start().await?;
//!
//! let mut uow = UnitOfWork::begin(&db).await?;
//! pipeline.request(chapter_id, uow.outbox()).await?;
//! uow.commit().await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::gate::{RequestGate, RequestOutcome};
use super::kind::AssetKind;
use super::outbox::Outbox;
use super::queue::DedupQueue;
use super::record::{StatusCounts, StatusView};
use super::recovery::{RecoverySummary, RecoverySweep, StalenessPolicy};
use super::set::AssetPipeline;
use super::store::RecordStore;
use super::traits::{
    AssetOutput, CompletionHook, FallbackGenerator, Generator, Target, TargetRepository,
};
use super::worker::{SharedWorkerStats, Worker, WorkerStats};
use crate::error::PipelineError;
use crate::metrics::MetricsCollector;
use crate::storage::Database;

/// Tunables for one pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Upper bound on one generator call.
    pub generation_timeout: Duration,
    /// How long `shutdown` waits for the worker.
    pub shutdown_timeout: Duration,
    /// Use the fallback when the generator errors or times out, not only
    /// when it is unavailable.
    pub fallback_on_error: bool,
    pub staleness: StalenessPolicy,
    /// How long the worker waits before retrying an item whose store
    /// calls kept failing.
    pub requeue_delay: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            fallback_on_error: false,
            staleness: StalenessPolicy::default(),
            requeue_delay: Duration::from_secs(5),
        }
    }
}

impl PipelineSettings {
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_fallback_on_error(mut self, enabled: bool) -> Self {
        self.fallback_on_error = enabled;
        self
    }

    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.staleness = StalenessPolicy::new(threshold);
        self
    }
}

/// Kind-specific collaborators of a pipeline.
pub struct PipelineParts<T: Target, O: AssetOutput> {
    pub targets: Arc<dyn TargetRepository<T>>,
    pub generator: Arc<dyn Generator<T, O>>,
    pub fallback: Arc<dyn FallbackGenerator<T, O>>,
    pub hook: Option<Arc<dyn CompletionHook<T, O>>>,
}

impl<T: Target, O: AssetOutput> PipelineParts<T, O> {
    pub fn new(
        targets: Arc<dyn TargetRepository<T>>,
        generator: Arc<dyn Generator<T, O>>,
        fallback: Arc<dyn FallbackGenerator<T, O>>,
    ) -> Self {
        Self {
            targets,
            generator,
            fallback,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CompletionHook<T, O>>) -> Self {
        self.hook = Some(hook);
        self
    }
}

impl<T: Target, O: AssetOutput> Clone for PipelineParts<T, O> {
    fn clone(&self) -> Self {
        Self {
            targets: Arc::clone(&self.targets),
            generator: Arc::clone(&self.generator),
            fallback: Arc::clone(&self.fallback),
            hook: self.hook.clone(),
        }
    }
}

/// Queue, worker, gate and sweep for one asset kind.
pub struct Pipeline<T: Target, O: AssetOutput> {
    kind: AssetKind,
    store: RecordStore,
    queue: Arc<DedupQueue>,
    gate: RequestGate<T>,
    sweep: RecoverySweep,
    parts: PipelineParts<T, O>,
    settings: PipelineSettings,
    shutdown_tx: broadcast::Sender<()>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<SharedWorkerStats>,
    is_running: AtomicBool,
}

impl<T: Target, O: AssetOutput> Pipeline<T, O> {
    pub fn new(
        kind: AssetKind,
        db: Database,
        parts: PipelineParts<T, O>,
        settings: PipelineSettings,
    ) -> Self {
        let store = RecordStore::new(db, kind);
        let queue = Arc::new(DedupQueue::new(kind));
        let gate = RequestGate::new(store.clone(), Arc::clone(&queue), Arc::clone(&parts.targets));
        let sweep = RecoverySweep::new(store.clone(), Arc::clone(&queue), settings.staleness);

        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            kind,
            store,
            queue,
            gate,
            sweep,
            parts,
            settings,
            shutdown_tx,
            worker_handle: Mutex::new(None),
            stats: Arc::new(SharedWorkerStats::default()),
            is_running: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn queue(&self) -> &Arc<DedupQueue> {
        &self.queue
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// See [`RequestGate::request_generation`].
    pub async fn request(
        &self,
        target_id: i64,
        outbox: &mut Outbox,
    ) -> Result<RequestOutcome, PipelineError> {
        self.gate.request_generation(target_id, outbox).await
    }

    /// See [`RequestGate::regenerate`].
    pub async fn regenerate(
        &self,
        target_id: i64,
        outbox: &mut Outbox,
    ) -> Result<RequestOutcome, PipelineError> {
        self.gate.regenerate(target_id, outbox).await
    }

    /// Status of the record for `target_id`, if one exists.
    pub async fn status(&self, target_id: i64) -> Result<Option<StatusView>, PipelineError> {
        Ok(self.store.get(target_id).await?.map(|r| r.view()))
    }

    pub async fn counts(&self, book_id: Option<i64>) -> Result<StatusCounts, PipelineError> {
        Ok(self.store.counts(book_id).await?)
    }

    /// Runs the recovery sweep, optionally scoped to one book.
    pub async fn recover(&self, book_id: Option<i64>) -> Result<RecoverySummary, PipelineError> {
        Ok(self.sweep.run(book_id).await?)
    }

    /// Runs the startup sweep, then spawns the worker.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::AlreadyRunning` if the worker is already up.
    pub async fn start(&self) -> Result<RecoverySummary, PipelineError> {
        let mut handle = self.worker_handle.lock().await;
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PipelineError::AlreadyRunning(self.kind));
        }

        let summary = self.sweep.run(None).await?;

        let worker = Worker {
            kind: self.kind,
            store: self.store.clone(),
            queue: Arc::clone(&self.queue),
            targets: Arc::clone(&self.parts.targets),
            generator: Arc::clone(&self.parts.generator),
            fallback: Arc::clone(&self.parts.fallback),
            hook: self.parts.hook.clone(),
            generation_timeout: self.settings.generation_timeout,
            fallback_on_error: self.settings.fallback_on_error,
            requeue_delay: self.settings.requeue_delay,
            stats: Arc::clone(&self.stats),
            metrics: MetricsCollector::new(),
        };
        let shutdown_rx = self.shutdown_tx.subscribe();
        *handle = Some(tokio::spawn(worker.run(shutdown_rx)));

        self.is_running.store(true, Ordering::SeqCst);
        info!(kind = %self.kind, recovered = summary.enqueued, "Pipeline started");
        Ok(summary)
    }

    /// Signals the worker and waits up to the shutdown timeout for it.
    ///
    /// # Errors
    ///
    /// `NotRunning` if never started, `ShutdownTimeout` if the worker did not
    /// stop in time (it is aborted).
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        let mut guard = self.worker_handle.lock().await;
        let Some(mut handle) = guard.take() else {
            return Err(PipelineError::NotRunning(self.kind));
        };
        self.is_running.store(false, Ordering::SeqCst);

        // Ignore send error - the worker may have already stopped
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(self.settings.shutdown_timeout, &mut handle).await {
            Ok(Ok(())) => {
                info!(kind = %self.kind, "Pipeline shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(kind = %self.kind, error = %e, "Worker task panicked during shutdown");
                Ok(())
            }
            Err(_) => {
                handle.abort();
                Err(PipelineError::ShutdownTimeout(self.settings.shutdown_timeout))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.snapshot()
    }
}

#[async_trait]
impl<T: Target, O: AssetOutput> AssetPipeline for Pipeline<T, O> {
    fn kind(&self) -> AssetKind {
        self.kind
    }

    async fn request(
        &self,
        target_id: i64,
        outbox: &mut Outbox,
    ) -> Result<RequestOutcome, PipelineError> {
        Pipeline::request(self, target_id, outbox).await
    }

    async fn regenerate(
        &self,
        target_id: i64,
        outbox: &mut Outbox,
    ) -> Result<RequestOutcome, PipelineError> {
        Pipeline::regenerate(self, target_id, outbox).await
    }

    async fn status(&self, target_id: i64) -> Result<Option<StatusView>, PipelineError> {
        Pipeline::status(self, target_id).await
    }

    async fn counts(&self, book_id: Option<i64>) -> Result<StatusCounts, PipelineError> {
        Pipeline::counts(self, book_id).await
    }

    async fn recover(&self, book_id: Option<i64>) -> Result<RecoverySummary, PipelineError> {
        Pipeline::recover(self, book_id).await
    }

    async fn start(&self) -> Result<RecoverySummary, PipelineError> {
        Pipeline::start(self).await
    }

    async fn shutdown(&self) -> Result<(), PipelineError> {
        Pipeline::shutdown(self).await
    }

    fn is_running(&self) -> bool {
        Pipeline::is_running(self)
    }

    fn stats(&self) -> WorkerStats {
        Pipeline::stats(self)
    }

    async fn queue_len(&self) -> usize {
        self.queue.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.generation_timeout, Duration::from_secs(300));
        assert_eq!(settings.shutdown_timeout, Duration::from_secs(30));
        assert!(!settings.fallback_on_error);
        assert_eq!(settings.staleness.stale_threshold, Duration::from_secs(900));
    }

    #[test]
    fn test_settings_builder() {
        let settings = PipelineSettings::default()
            .with_generation_timeout(Duration::from_secs(5))
            .with_shutdown_timeout(Duration::from_secs(1))
            .with_fallback_on_error(true)
            .with_requeue_delay(Duration::from_millis(250))
            .with_stale_threshold(Duration::from_secs(60));

        assert_eq!(settings.generation_timeout, Duration::from_secs(5));
        assert_eq!(settings.shutdown_timeout, Duration::from_secs(1));
        assert!(settings.fallback_on_error);
        assert_eq!(settings.requeue_delay, Duration::from_millis(250));
        assert_eq!(settings.staleness.stale_threshold, Duration::from_secs(60));
    }
}
