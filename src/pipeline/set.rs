//! All pipelines of an application, addressed by kind.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use super::gate::RequestOutcome;
use super::kind::{AssetKind, AssetRequest};
use super::outbox::Outbox;
use super::record::{StatusCounts, StatusView};
use super::recovery::RecoverySummary;
use super::worker::WorkerStats;
use crate::error::PipelineError;

/// Kind-erased view of a `Pipeline<T, O>`.
#[async_trait]
pub trait AssetPipeline: Send + Sync {
    fn kind(&self) -> AssetKind;

    async fn request(
        &self,
        target_id: i64,
        outbox: &mut Outbox,
    ) -> Result<RequestOutcome, PipelineError>;

    async fn regenerate(
        &self,
        target_id: i64,
        outbox: &mut Outbox,
    ) -> Result<RequestOutcome, PipelineError>;

    async fn status(&self, target_id: i64) -> Result<Option<StatusView>, PipelineError>;

    async fn counts(&self, book_id: Option<i64>) -> Result<StatusCounts, PipelineError>;

    async fn recover(&self, book_id: Option<i64>) -> Result<RecoverySummary, PipelineError>;

    async fn start(&self) -> Result<RecoverySummary, PipelineError>;

    async fn shutdown(&self) -> Result<(), PipelineError>;

    fn is_running(&self) -> bool;

    fn stats(&self) -> WorkerStats;

    async fn queue_len(&self) -> usize;
}

/// Registry of pipelines keyed by kind.
#[derive(Clone, Default)]
pub struct AssetPipelines {
    pipelines: BTreeMap<AssetKind, Arc<dyn AssetPipeline>>,
}

impl AssetPipelines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pipeline, replacing any previous one of the same kind.
    pub fn insert(&mut self, pipeline: Arc<dyn AssetPipeline>) {
        self.pipelines.insert(pipeline.kind(), pipeline);
    }

    pub fn with(mut self, pipeline: Arc<dyn AssetPipeline>) -> Self {
        self.insert(pipeline);
        self
    }

    /// # Errors
    ///
    /// `UnknownKind` if no pipeline of that kind is registered.
    pub fn get(&self, kind: AssetKind) -> Result<&Arc<dyn AssetPipeline>, PipelineError> {
        self.pipelines
            .get(&kind)
            .ok_or(PipelineError::UnknownKind(kind))
    }

    pub fn kinds(&self) -> Vec<AssetKind> {
        self.pipelines.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn AssetPipeline>> {
        self.pipelines.values()
    }

    /// Routes a request to the pipeline of its kind.
    pub async fn request(
        &self,
        request: AssetRequest,
        outbox: &mut Outbox,
    ) -> Result<RequestOutcome, PipelineError> {
        self.get(request.kind())?
            .request(request.target_id(), outbox)
            .await
    }

    pub async fn regenerate(
        &self,
        request: AssetRequest,
        outbox: &mut Outbox,
    ) -> Result<RequestOutcome, PipelineError> {
        self.get(request.kind())?
            .regenerate(request.target_id(), outbox)
            .await
    }

    pub async fn status(&self, request: AssetRequest) -> Result<Option<StatusView>, PipelineError> {
        self.get(request.kind())?.status(request.target_id()).await
    }

    /// Starts every pipeline, running each startup sweep first.
    pub async fn start_all(&self) -> Result<Vec<RecoverySummary>, PipelineError> {
        let mut summaries = Vec::with_capacity(self.pipelines.len());
        for pipeline in self.pipelines.values() {
            summaries.push(pipeline.start().await?);
        }
        info!(pipelines = summaries.len(), "All pipelines started");
        Ok(summaries)
    }

    /// Shuts down every running pipeline. Keeps going past failures and
    /// returns the first one.
    pub async fn shutdown_all(&self) -> Result<(), PipelineError> {
        let running: Vec<&Arc<dyn AssetPipeline>> = self
            .pipelines
            .values()
            .filter(|p| p.is_running())
            .collect();
        let results = futures::future::join_all(
            running
                .iter()
                .map(|p| async move { (p.kind(), p.shutdown().await) }),
        )
        .await;

        let mut first_error = None;
        for (kind, result) in results {
            if let Err(e) = result {
                error!(kind = %kind, error = %e, "Pipeline shutdown failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Runs the recovery sweep of every pipeline.
    pub async fn recover_all(
        &self,
        book_id: Option<i64>,
    ) -> Result<Vec<RecoverySummary>, PipelineError> {
        let mut summaries = Vec::with_capacity(self.pipelines.len());
        for pipeline in self.pipelines.values() {
            summaries.push(pipeline.recover(book_id).await?);
        }
        Ok(summaries)
    }

    /// Per-kind counts, optionally scoped to a book.
    pub async fn counts(
        &self,
        book_id: Option<i64>,
    ) -> Result<BTreeMap<AssetKind, StatusCounts>, PipelineError> {
        let mut counts = BTreeMap::new();
        for (kind, pipeline) in &self.pipelines {
            counts.insert(*kind, pipeline.counts(book_id).await?);
        }
        Ok(counts)
    }
}
