//! Image persistence and the diffusion-backed image generators.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::info;

use super::client::DiffusionClient;
use crate::assets::prompts::{
    render_illustration_prompt, render_portrait_prompt, IMAGE_NEGATIVE_PROMPT,
};
use crate::assets::ImageAsset;
use crate::catalog::{Chapter, Character};
use crate::error::GeneratorError;
use crate::pipeline::{AssetKind, Generator, Target};

/// Content-addressed image files under the asset directory.
///
/// Layout: `{root}/{kind}/{target_id}-{hash[0:16]}.png`. Writing the same
/// bytes twice yields the same name and a single file.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a stored file name.
    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    fn file_name(kind: AssetKind, target_id: i64, bytes: &[u8]) -> String {
        let hash = hex::encode(Sha256::digest(bytes));
        format!("{}/{}-{}.png", kind.as_str(), target_id, &hash[..16])
    }

    /// Writes `bytes` and returns the file name relative to the root.
    pub async fn save(
        &self,
        kind: AssetKind,
        target_id: i64,
        bytes: &[u8],
    ) -> Result<String, GeneratorError> {
        let file_name = Self::file_name(kind, target_id, bytes);
        let path = self.path_of(&file_name);

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(file_name);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Temp file plus rename so readers never see a partial image.
        let temp_path = path.with_extension("png.tmp");
        tokio::fs::write(&temp_path, bytes).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        info!(
            kind = %kind,
            target_id = target_id,
            path = %path.display(),
            size = bytes.len(),
            "Stored image"
        );
        Ok(file_name)
    }
}

/// Image generator for one kind, backed by an optional diffusion client.
///
/// Without a client it reports itself unavailable and the pipeline uses its
/// placeholder.
#[derive(Debug, Clone)]
pub struct DiffusionImageGenerator {
    kind: AssetKind,
    name: String,
    client: Option<DiffusionClient>,
    store: ImageStore,
}

impl DiffusionImageGenerator {
    pub fn new(kind: AssetKind, client: Option<DiffusionClient>, store: ImageStore) -> Self {
        Self {
            kind,
            name: format!("diffusion-{}", kind),
            client,
            store,
        }
    }

    async fn available(&self) -> bool {
        match &self.client {
            Some(client) => client.probe().await,
            None => false,
        }
    }

    async fn render(&self, target_id: i64, prompt: &str) -> Result<ImageAsset, GeneratorError> {
        let client = self.client.as_ref().ok_or_else(|| {
            GeneratorError::Unavailable("no diffusion backend configured".to_string())
        })?;
        let bytes = client.txt2img(prompt, IMAGE_NEGATIVE_PROMPT).await?;
        let file_name = self.store.save(self.kind, target_id, &bytes).await?;
        Ok(ImageAsset::generated(file_name))
    }
}

#[async_trait]
impl Generator<Chapter, ImageAsset> for DiffusionImageGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        self.available().await
    }

    async fn generate(&self, chapter: &Chapter) -> Result<ImageAsset, GeneratorError> {
        let prompt = render_illustration_prompt(chapter)?;
        self.render(chapter.id(), &prompt).await
    }
}

#[async_trait]
impl Generator<Character, ImageAsset> for DiffusionImageGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        self.available().await
    }

    async fn generate(&self, character: &Character) -> Result<ImageAsset, GeneratorError> {
        let prompt = render_portrait_prompt(character)?;
        self.render(character.id(), &prompt).await
    }
}
