//! Request gate: the only way producers ask for an asset.
//!
//! The gate validates the target, makes sure a record exists and is
//! `Pending`, and registers the enqueue in the caller's [`Outbox`]. Record
//! writes happen on the store's own connections; the queue only learns about
//! the id when the caller flushes the outbox after committing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::kind::AssetKind;
use super::outbox::Outbox;
use super::queue::DedupQueue;
use super::record::{GenerationRecord, GenerationStatus};
use super::store::RecordStore;
use super::traits::{Target, TargetRepository};
use crate::error::PipelineError;
use crate::metrics::MetricsCollector;
use crate::storage::DatabaseError;

/// What a gate call did. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    /// Record is `Pending` and an enqueue was deferred to the outbox.
    Scheduled,
    /// Already generated; nothing changed.
    AlreadyCompleted,
    /// The worker owns it right now; nothing changed.
    AlreadyInProgress,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::Scheduled => "scheduled",
            RequestOutcome::AlreadyCompleted => "already_completed",
            RequestOutcome::AlreadyInProgress => "already_in_progress",
        }
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self, RequestOutcome::Scheduled)
    }
}

impl std::fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request gate for one asset kind.
pub struct RequestGate<T: Target> {
    store: RecordStore,
    queue: Arc<DedupQueue>,
    targets: Arc<dyn TargetRepository<T>>,
    metrics: MetricsCollector,
}

impl<T: Target> RequestGate<T> {
    pub fn new(
        store: RecordStore,
        queue: Arc<DedupQueue>,
        targets: Arc<dyn TargetRepository<T>>,
    ) -> Self {
        Self {
            store,
            queue,
            targets,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn kind(&self) -> AssetKind {
        self.store.kind()
    }

    /// Asks for the asset of `target_id`.
    ///
    /// Completed and in-flight records are left untouched. Failed, pending
    /// and legacy records end up `Pending` with an enqueue registered in
    /// `outbox`.
    ///
    /// # Errors
    ///
    /// `TargetNotFound` if the target does not exist; no record is created.
    pub async fn request_generation(
        &self,
        target_id: i64,
        outbox: &mut Outbox,
    ) -> Result<RequestOutcome, PipelineError> {
        self.submit(target_id, outbox, false).await
    }

    /// Like [`request_generation`](Self::request_generation), but a completed
    /// record is also reset to `Pending` with its output cleared.
    pub async fn regenerate(
        &self,
        target_id: i64,
        outbox: &mut Outbox,
    ) -> Result<RequestOutcome, PipelineError> {
        self.submit(target_id, outbox, true).await
    }

    async fn submit(
        &self,
        target_id: i64,
        outbox: &mut Outbox,
        force: bool,
    ) -> Result<RequestOutcome, PipelineError> {
        let kind = self.kind();
        let Some(target) = self.targets.find(target_id).await? else {
            self.metrics.record_request(kind, "not_found");
            return Err(PipelineError::TargetNotFound { kind, target_id });
        };

        let (previous, outcome) = loop {
            let record = self.get_or_create(&target).await?;

            let outcome = match record.status {
                Some(GenerationStatus::Generating) => RequestOutcome::AlreadyInProgress,
                Some(GenerationStatus::Completed) if !force => RequestOutcome::AlreadyCompleted,
                Some(GenerationStatus::Pending) => RequestOutcome::Scheduled,
                // Failed, legacy NULL, or a forced completed record. The
                // reset only applies if nobody moved the record since the read.
                expected => {
                    if !self.store.reset_to_pending_if(target_id, expected).await? {
                        debug!(
                            kind = %kind,
                            target_id = target_id,
                            seen = ?expected,
                            "Record changed under request, re-reading"
                        );
                        continue;
                    }
                    RequestOutcome::Scheduled
                }
            };
            break (record.status, outcome);
        };

        if outcome.is_scheduled() {
            outbox.defer(Arc::clone(&self.queue), target_id);
        }

        debug!(
            kind = %kind,
            target_id = target_id,
            previous = ?previous,
            outcome = %outcome,
            "Generation requested"
        );
        self.metrics.record_request(kind, outcome.as_str());
        Ok(outcome)
    }

    /// Reads the record, creating it if absent. Losing the creation race is
    /// the same as finding the record.
    async fn get_or_create(&self, target: &T) -> Result<GenerationRecord, PipelineError> {
        let target_id = target.id();
        if let Some(record) = self.store.get(target_id).await? {
            return Ok(record);
        }

        match self.store.create(target_id, target.book_id()).await {
            Ok(record) => Ok(record),
            Err(DatabaseError::AlreadyExists { .. }) => {
                debug!(
                    kind = %self.kind(),
                    target_id = target_id,
                    "Lost creation race, using existing record"
                );
                self.store.get(target_id).await?.ok_or_else(|| {
                    DatabaseError::NotFound(format!(
                        "{} record for target {} deleted after creation race",
                        self.kind(),
                        target_id
                    ))
                    .into()
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
