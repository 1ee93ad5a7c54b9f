//! Collaborator interfaces consumed by a pipeline.
//!
//! A `Pipeline<T, O>` is parameterized by its target type `T` (chapter or
//! character) and output type `O`. Everything kind-specific reaches the
//! mechanism through these traits.

use async_trait::async_trait;

use crate::error::{GeneratorError, PipelineError};
use crate::storage::DatabaseError;

/// Something an asset is generated for.
pub trait Target: Clone + Send + Sync + 'static {
    fn id(&self) -> i64;

    /// Owning book, copied onto the generation record.
    fn book_id(&self) -> i64;
}

/// Looks targets up by id.
#[async_trait]
pub trait TargetRepository<T: Target>: Send + Sync {
    async fn find(&self, id: i64) -> Result<Option<T>, DatabaseError>;
}

/// Primary, possibly remote, producer of an asset.
#[async_trait]
pub trait Generator<T: Target, O>: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Cheap availability probe. The worker uses the fallback when this is
    /// false.
    async fn is_available(&self) -> bool;

    /// Produces the asset. Called under the pipeline's generation timeout.
    async fn generate(&self, target: &T) -> Result<O, GeneratorError>;
}

/// Deterministic local producer used when the generator cannot be.
pub trait FallbackGenerator<T: Target, O>: Send + Sync {
    /// Must not fail and must not block on the network.
    fn build(&self, target: &T) -> O;
}

/// A generated asset that can be stored in `output_ref`.
pub trait AssetOutput: Send + Sync + 'static {
    /// File name or JSON payload. An error here fails the record.
    fn output_ref(&self) -> Result<String, GeneratorError>;
}

/// Runs after a record is written `Completed`.
///
/// Errors are logged by the worker and never change the record.
#[async_trait]
pub trait CompletionHook<T: Target, O>: Send + Sync {
    async fn on_completed(&self, target: &T, output: &O) -> Result<(), PipelineError>;
}
