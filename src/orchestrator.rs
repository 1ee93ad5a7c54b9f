//! Wires configuration, storage, generators and the five pipelines together.
//!
//! `Orchestrator` owns:
//! - the SQLite database and the catalog on top of it
//! - one `Pipeline<T, O>` per asset kind, registered in [`AssetPipelines`]
//! - the [`Library`] producer and the batch [`Pregenerator`]

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::assets::{
    ChapterAnalysis, DiscoverCharacters, ExtractiveAnalysis, ExtractiveQuiz, ExtractiveRecap,
    ImageAsset, LlmTextGenerator, PlaceholderImage, Quiz, Recap, TextModelSettings,
};
use crate::catalog::{Book, BookImport, Catalog, Chapter, Character};
use crate::config::{ConfigError, PipelineConfig};
use crate::diffusion::{DiffusionClient, DiffusionImageGenerator, ImageStore};
use crate::error::{GeneratorError, PipelineError};
use crate::library::Library;
use crate::llm::{LiteLlmClient, LlmProvider};
use crate::pipeline::{
    AssetKind, AssetPipeline, AssetPipelines, Pipeline, PipelineParts, Pregenerator,
    RecoverySummary, TargetRepository,
};
use crate::storage::{Database, DatabaseError};

/// Errors that can occur while assembling or driving the application.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Generator setup failed: {0}")]
    Generator(#[from] GeneratorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid book file: {0}")]
    Json(#[from] serde_json::Error),
}

/// The assembled application.
pub struct Orchestrator {
    config: PipelineConfig,
    db: Database,
    catalog: Catalog,
    pipelines: AssetPipelines,
    library: Library,
    pregenerator: Pregenerator,
    images: ImageStore,
}

impl Orchestrator {
    /// Connects to the configured database, runs migrations and builds every
    /// pipeline. The LLM provider comes from `LITELLM_*` variables; without
    /// them the text kinds run on their extractive fallbacks.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError` if the configuration is invalid or the
    /// database cannot be opened.
    pub async fn new(config: PipelineConfig) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let db = Database::connect(&config.database_url).await?;
        db.run_migrations().await?;

        let llm: Option<Arc<dyn LlmProvider>> = match LiteLlmClient::from_env() {
            Ok(client) => {
                info!(api_base = %client.api_base(), model = %config.llm_model, "LLM provider configured");
                Some(Arc::new(client))
            }
            Err(e) => {
                warn!(error = %e, "No LLM provider, text assets will use fallbacks");
                None
            }
        };

        Self::with_providers(config, db, llm)
    }

    /// Builds the application on an open database with an explicit LLM
    /// provider.
    pub fn with_providers(
        config: PipelineConfig,
        db: Database,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let catalog = Catalog::new(db.clone());
        let images = ImageStore::new(&config.asset_dir);

        let diffusion = match &config.diffusion_url {
            Some(url) => Some(DiffusionClient::new(
                url.clone(),
                config.image_width,
                config.image_height,
                config.generation_timeout,
            )?),
            None => {
                warn!("FOLIO_DIFFUSION_URL not set, images will use placeholders");
                None
            }
        };

        let text = Arc::new(match llm {
            Some(provider) => LlmTextGenerator::new(
                provider,
                TextModelSettings {
                    model: config.llm_model.clone(),
                    temperature: config.llm_temperature,
                    max_tokens: config.llm_max_tokens,
                    ..TextModelSettings::default()
                },
            ),
            None => LlmTextGenerator::unconfigured(),
        });

        let chapters: Arc<dyn TargetRepository<Chapter>> = Arc::new(catalog.clone());
        let characters: Arc<dyn TargetRepository<Character>> = Arc::new(catalog.clone());

        let portraits = Arc::new(Pipeline::new(
            AssetKind::Portrait,
            db.clone(),
            PipelineParts::<Character, ImageAsset>::new(
                characters,
                Arc::new(DiffusionImageGenerator::new(
                    AssetKind::Portrait,
                    diffusion.clone(),
                    images.clone(),
                )),
                Arc::new(PlaceholderImage::new(AssetKind::Portrait.as_str())),
            ),
            config.settings_for(AssetKind::Portrait),
        ));

        let illustrations = Arc::new(Pipeline::new(
            AssetKind::Illustration,
            db.clone(),
            PipelineParts::<Chapter, ImageAsset>::new(
                Arc::clone(&chapters),
                Arc::new(DiffusionImageGenerator::new(
                    AssetKind::Illustration,
                    diffusion,
                    images.clone(),
                )),
                Arc::new(PlaceholderImage::new(AssetKind::Illustration.as_str())),
            ),
            config.settings_for(AssetKind::Illustration),
        ));

        let portrait_pipeline: Arc<dyn AssetPipeline> = portraits.clone();
        let analyses = Arc::new(Pipeline::new(
            AssetKind::ChapterAnalysis,
            db.clone(),
            PipelineParts::<Chapter, ChapterAnalysis>::new(
                Arc::clone(&chapters),
                text.clone(),
                Arc::new(ExtractiveAnalysis::default()),
            )
            .with_hook(Arc::new(DiscoverCharacters::new(
                catalog.clone(),
                portrait_pipeline,
            ))),
            config.settings_for(AssetKind::ChapterAnalysis),
        ));

        let recaps = Arc::new(Pipeline::new(
            AssetKind::Recap,
            db.clone(),
            PipelineParts::<Chapter, Recap>::new(
                Arc::clone(&chapters),
                text.clone(),
                Arc::new(ExtractiveRecap::default()),
            ),
            config.settings_for(AssetKind::Recap),
        ));

        let quizzes = Arc::new(Pipeline::new(
            AssetKind::Quiz,
            db.clone(),
            PipelineParts::<Chapter, Quiz>::new(
                chapters,
                text,
                Arc::new(ExtractiveQuiz::default()),
            ),
            config.settings_for(AssetKind::Quiz),
        ));

        let pipelines = AssetPipelines::new()
            .with(portraits)
            .with(illustrations)
            .with(analyses)
            .with(recaps)
            .with(quizzes);

        let library = Library::new(catalog.clone(), pipelines.clone());
        let pregenerator = Pregenerator::new(
            catalog.clone(),
            pipelines.clone(),
            config.pregenerate_settings(),
        );

        Ok(Self {
            config,
            db,
            catalog,
            pipelines,
            library,
            pregenerator,
            images,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn pipelines(&self) -> &AssetPipelines {
        &self.pipelines
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn pregenerator(&self) -> &Pregenerator {
        &self.pregenerator
    }

    pub fn image_store(&self) -> &ImageStore {
        &self.images
    }

    /// Runs every startup sweep and starts the workers.
    pub async fn start(&self) -> Result<Vec<RecoverySummary>, OrchestratorError> {
        Ok(self.pipelines.start_all().await?)
    }

    /// Stops every running worker.
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        Ok(self.pipelines.shutdown_all().await?)
    }

    /// Imports a book from its JSON description.
    pub async fn import_book(&self, import: &BookImport) -> Result<Book, OrchestratorError> {
        let book = self.catalog.import_book(import).await?;
        info!(
            book_id = book.id,
            title = %book.title,
            chapters = import.chapters.len(),
            characters = import.characters.len(),
            "Book imported"
        );
        Ok(book)
    }

    /// Reads and imports a book file.
    pub async fn import_file(&self, path: &std::path::Path) -> Result<Book, OrchestratorError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let import: BookImport = serde_json::from_str(&raw)?;
        self.import_book(&import).await
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}
