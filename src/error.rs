//! Error types for folio-forge operations.
//!
//! Defines the error types shared across subsystems:
//! - Generation pipeline (request gate, worker loop, recovery)
//! - External generators (LLM providers, diffusion backends, fallbacks)
//! - LLM API interactions
//!
//! Storage errors live next to the database client in
//! [`crate::storage::DatabaseError`]; configuration errors live in
//! [`crate::config::ConfigError`].

use std::time::Duration;

use thiserror::Error;

use crate::pipeline::AssetKind;
use crate::storage::DatabaseError;

/// Errors surfaced by the generation pipeline to its callers.
///
/// Requests for completed or in-flight assets are not errors; see
/// [`crate::pipeline::RequestOutcome`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{kind} target {target_id} not found")]
    TargetNotFound { kind: AssetKind, target_id: i64 },

    #[error("Storage error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Pipeline for {0} is already running")]
    AlreadyRunning(AssetKind),

    #[error("Pipeline for {0} is not running")]
    NotRunning(AssetKind),

    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    #[error("No pipeline registered for {0}")]
    UnknownKind(AssetKind),
}

/// Errors raised while producing a single asset.
///
/// Every variant ends up as the `error_message` of a `FAILED` record, except
/// `Unavailable`, which the worker absorbs by switching to the fallback.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Generator unavailable: {0}")]
    Unavailable(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed generator output: {0}")]
    MalformedOutput(String),

    #[error("Prompt rendering failed: {0}")]
    Template(#[from] tera::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: LITELLM_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Empty completion from model {0}")]
    EmptyCompletion(String),
}
