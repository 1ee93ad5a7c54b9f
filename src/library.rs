//! Reader-facing producer of generation requests.
//!
//! Opening a chapter requests the assets a reader is about to need and
//! records reading progress. Requests and progress share one unit of work, so
//! nothing is enqueued unless the progress write commits.

use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::{Catalog, Chapter};
use crate::error::PipelineError;
use crate::pipeline::{
    AssetPipelines, AssetRequest, Outbox, RequestOutcome, StatusView, UnitOfWork,
};
use crate::storage::DatabaseError;

/// What opening a chapter scheduled.
#[derive(Debug, Clone, Serialize)]
pub struct OpenedChapter {
    pub chapter: Chapter,
    pub requests: Vec<(AssetRequest, RequestOutcome)>,
    /// Ids pushed onto queues after commit.
    pub enqueued: usize,
}

impl OpenedChapter {
    pub fn scheduled(&self) -> usize {
        self.requests
            .iter()
            .filter(|(_, outcome)| outcome.is_scheduled())
            .count()
    }
}

#[derive(Clone)]
pub struct Library {
    catalog: Catalog,
    pipelines: AssetPipelines,
}

impl Library {
    pub fn new(catalog: Catalog, pipelines: AssetPipelines) -> Self {
        Self { catalog, pipelines }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn pipelines(&self) -> &AssetPipelines {
        &self.pipelines
    }

    /// Assets requested when `chapter` is opened: its illustration and
    /// analysis, the next chapter's illustration and the previous chapter's
    /// recap.
    pub async fn plan_for(&self, chapter: &Chapter) -> Result<Vec<AssetRequest>, PipelineError> {
        let mut plan = vec![
            AssetRequest::Illustration(chapter.id),
            AssetRequest::ChapterAnalysis(chapter.id),
        ];
        if let Some(next) = self
            .catalog
            .chapter_by_number(chapter.book_id, chapter.number + 1)
            .await?
        {
            plan.push(AssetRequest::Illustration(next.id));
        }
        if chapter.number > 1 {
            if let Some(previous) = self
                .catalog
                .chapter_by_number(chapter.book_id, chapter.number - 1)
                .await?
            {
                plan.push(AssetRequest::Recap(previous.id));
            }
        }
        Ok(plan)
    }

    /// Validates the chapter, requests its assets, records progress and
    /// commits. Ids reach the queues only after the commit.
    pub async fn open_chapter(&self, chapter_id: i64) -> Result<OpenedChapter, PipelineError> {
        let chapter = self
            .catalog
            .get_chapter(chapter_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("chapter {}", chapter_id)))?;
        let plan = self.plan_for(&chapter).await?;

        let mut uow = UnitOfWork::begin(self.catalog.database()).await?;

        // Gate writes go first; the transaction takes its write lock last.
        let mut requests = Vec::with_capacity(plan.len());
        for request in plan {
            let result = self.pipelines.request(request, uow.outbox()).await;
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    uow.rollback().await?;
                    return Err(e);
                }
            };
            debug!(?request, outcome = %outcome, "Chapter asset requested");
            requests.push((request, outcome));
        }

        Catalog::record_progress(uow.conn(), chapter.book_id, chapter.id).await?;
        let enqueued = uow.commit().await?;

        let opened = OpenedChapter {
            chapter,
            requests,
            enqueued,
        };
        info!(
            chapter_id = opened.chapter.id,
            book_id = opened.chapter.book_id,
            scheduled = opened.scheduled(),
            enqueued = enqueued,
            "Chapter opened"
        );
        Ok(opened)
    }

    /// Requests one asset outside any caller transaction.
    pub async fn request(&self, request: AssetRequest) -> Result<RequestOutcome, PipelineError> {
        let mut outbox = Outbox::new();
        let outcome = self.pipelines.request(request, &mut outbox).await?;
        outbox.flush().await;
        Ok(outcome)
    }

    /// Discards any finished output and schedules the asset again.
    pub async fn regenerate(&self, request: AssetRequest) -> Result<RequestOutcome, PipelineError> {
        let mut outbox = Outbox::new();
        let outcome = self.pipelines.regenerate(request, &mut outbox).await?;
        outbox.flush().await;
        Ok(outcome)
    }

    pub async fn status(&self, request: AssetRequest) -> Result<Option<StatusView>, PipelineError> {
        self.pipelines.status(request).await
    }
}
