//! Batch pre-generation for a whole book.
//!
//! Requests every chapter asset (and portraits for known characters) in one
//! unit of work, then polls record counts until everything is terminal.
//! When the number of terminal records stops moving for `stall_polls`
//! consecutive polls, a recovery sweep scoped to the book is run; what counts
//! as stale is still decided by the pipelines' staleness policy.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::gate::RequestOutcome;
use super::kind::{AssetKind, TargetType};
use super::outbox::UnitOfWork;
use super::record::StatusCounts;
use super::set::AssetPipelines;
use crate::catalog::Catalog;
use crate::error::PipelineError;
use crate::storage::DatabaseError;

/// Polling behaviour of a batch wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PregenerateSettings {
    pub poll_interval: Duration,
    /// Polls without progress before a sweep is triggered.
    pub stall_polls: u32,
    /// Give up waiting after this long; work keeps going in the background.
    pub timeout: Duration,
}

impl Default for PregenerateSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            stall_polls: 10,
            timeout: Duration::from_secs(3600),
        }
    }
}

/// Outcome of one batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PregenerationReport {
    pub book_id: i64,
    pub scheduled: usize,
    pub already_completed: usize,
    pub already_in_progress: usize,
    /// Counts per kind when the wait ended.
    pub counts: BTreeMap<AssetKind, StatusCounts>,
    /// Stall-triggered sweeps.
    pub sweeps: usize,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

impl PregenerationReport {
    pub fn totals(&self) -> StatusCounts {
        self.counts
            .values()
            .fold(StatusCounts::default(), |acc, c| acc.merge(c))
    }
}

/// Drives a book through every requested pipeline.
pub struct Pregenerator {
    catalog: Catalog,
    pipelines: AssetPipelines,
    settings: PregenerateSettings,
}

impl Pregenerator {
    pub fn new(catalog: Catalog, pipelines: AssetPipelines, settings: PregenerateSettings) -> Self {
        Self {
            catalog,
            pipelines,
            settings,
        }
    }

    /// Requests `kinds` for every target of `book_id` and waits for them.
    pub async fn run(
        &self,
        book_id: i64,
        kinds: &[AssetKind],
    ) -> Result<PregenerationReport, PipelineError> {
        let start = Instant::now();
        if self.catalog.get_book(book_id).await?.is_none() {
            return Err(DatabaseError::NotFound(format!("book {}", book_id)).into());
        }

        let mut report = PregenerationReport {
            book_id,
            ..Default::default()
        };
        self.submit(book_id, kinds, &mut report).await?;

        info!(
            book_id = book_id,
            kinds = ?kinds,
            scheduled = report.scheduled,
            already_completed = report.already_completed,
            "Pre-generation requested"
        );

        self.wait(book_id, kinds, start, &mut report).await?;
        report.elapsed_ms = start.elapsed().as_millis() as u64;

        let totals = report.totals();
        info!(
            book_id = book_id,
            completed = totals.completed,
            failed = totals.failed,
            sweeps = report.sweeps,
            timed_out = report.timed_out,
            elapsed_ms = report.elapsed_ms,
            "Pre-generation finished"
        );
        Ok(report)
    }

    async fn submit(
        &self,
        book_id: i64,
        kinds: &[AssetKind],
        report: &mut PregenerationReport,
    ) -> Result<(), PipelineError> {
        let chapters = self.catalog.chapters(book_id).await?;
        let characters = self.catalog.characters(book_id).await?;

        let mut uow = UnitOfWork::begin(self.catalog.database()).await?;
        for &kind in kinds {
            let pipeline = self.pipelines.get(kind)?;
            let target_ids: Vec<i64> = match kind.target_type() {
                TargetType::Chapter => chapters.iter().map(|c| c.id).collect(),
                TargetType::Character => characters.iter().map(|c| c.id).collect(),
            };
            for target_id in target_ids {
                match pipeline.request(target_id, uow.outbox()).await? {
                    RequestOutcome::Scheduled => report.scheduled += 1,
                    RequestOutcome::AlreadyCompleted => report.already_completed += 1,
                    RequestOutcome::AlreadyInProgress => report.already_in_progress += 1,
                }
            }
        }
        uow.commit().await?;
        Ok(())
    }

    async fn wait(
        &self,
        book_id: i64,
        kinds: &[AssetKind],
        start: Instant,
        report: &mut PregenerationReport,
    ) -> Result<(), PipelineError> {
        let mut last_terminal = None;
        let mut idle_polls = 0u32;

        loop {
            let mut counts = BTreeMap::new();
            for &kind in kinds {
                counts.insert(kind, self.pipelines.get(kind)?.counts(Some(book_id)).await?);
            }
            report.counts = counts;

            let totals = report.totals();
            if totals.is_settled() {
                return Ok(());
            }
            if start.elapsed() >= self.settings.timeout {
                warn!(
                    book_id = book_id,
                    remaining = totals.total() - totals.terminal(),
                    "Pre-generation wait timed out"
                );
                report.timed_out = true;
                return Ok(());
            }

            if last_terminal == Some(totals.terminal()) {
                idle_polls += 1;
            } else {
                idle_polls = 0;
                last_terminal = Some(totals.terminal());
            }

            if self.settings.stall_polls > 0 && idle_polls >= self.settings.stall_polls {
                warn!(
                    book_id = book_id,
                    idle_polls = idle_polls,
                    "No progress, running recovery sweep"
                );
                for &kind in kinds {
                    self.pipelines.get(kind)?.recover(Some(book_id)).await?;
                }
                report.sweeps += 1;
                idle_polls = 0;
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = PregenerateSettings::default();
        assert_eq!(settings.poll_interval, Duration::from_millis(2000));
        assert_eq!(settings.stall_polls, 10);
        assert_eq!(settings.timeout, Duration::from_secs(3600));
    }

    #[test]
    fn test_report_totals() {
        let mut report = PregenerationReport::default();
        report.counts.insert(
            AssetKind::Recap,
            StatusCounts {
                completed: 2,
                ..Default::default()
            },
        );
        report.counts.insert(
            AssetKind::Quiz,
            StatusCounts {
                failed: 1,
                pending: 1,
                ..Default::default()
            },
        );
        let totals = report.totals();
        assert_eq!(totals.total(), 4);
        assert_eq!(totals.terminal(), 3);
        assert!(!totals.is_settled());
    }
}
