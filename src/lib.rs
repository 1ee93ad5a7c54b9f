//! folio-forge: asynchronous asset generation for e-books.
//!
//! Readers open chapters; the library requests illustrations, portraits,
//! recaps, quizzes and analyses, and one durable pipeline per kind generates
//! them in the background.

pub mod assets;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod diffusion;
pub mod error;
pub mod library;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod storage;
pub mod utils;

pub use config::{ConfigError, PipelineConfig};
pub use error::{GeneratorError, LlmError, PipelineError};
pub use library::{Library, OpenedChapter};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use storage::{Database, DatabaseError};
