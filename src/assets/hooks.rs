//! Completion hooks wiring one kind's output into another kind's requests.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::outputs::ChapterAnalysis;
use crate::catalog::{Catalog, Chapter};
use crate::error::PipelineError;
use crate::pipeline::{AssetPipeline, CompletionHook, Outbox, RequestOutcome};

/// Adds characters found by an analysis to the catalog and requests their
/// portraits.
pub struct DiscoverCharacters {
    catalog: Catalog,
    portraits: Arc<dyn AssetPipeline>,
}

impl DiscoverCharacters {
    pub fn new(catalog: Catalog, portraits: Arc<dyn AssetPipeline>) -> Self {
        Self { catalog, portraits }
    }
}

#[async_trait]
impl CompletionHook<Chapter, ChapterAnalysis> for DiscoverCharacters {
    async fn on_completed(
        &self,
        chapter: &Chapter,
        analysis: &ChapterAnalysis,
    ) -> Result<(), PipelineError> {
        let mut outbox = Outbox::new();
        let mut created = 0usize;
        let mut scheduled = 0usize;

        for note in &analysis.characters {
            let name = note.name.trim();
            if name.is_empty() {
                continue;
            }
            let (character, is_new) = self
                .catalog
                .upsert_character(chapter.book_id, name, note.description.trim())
                .await?;
            if is_new {
                created += 1;
            }

            let outcome = self.portraits.request(character.id, &mut outbox).await?;
            debug!(
                character_id = character.id,
                name = %character.name,
                outcome = %outcome,
                "Portrait requested"
            );
            if outcome == RequestOutcome::Scheduled {
                scheduled += 1;
            }
        }

        // No enclosing transaction: the upserts are already committed.
        outbox.flush().await;

        if created > 0 || scheduled > 0 {
            info!(
                chapter_id = chapter.id,
                book_id = chapter.book_id,
                created = created,
                portraits_scheduled = scheduled,
                "Characters discovered"
            );
        }
        Ok(())
    }
}
