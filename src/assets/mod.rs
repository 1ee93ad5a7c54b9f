//! Asset outputs and the generators that produce them.
//!
//! - [`outputs`]: what each kind stores in `output_ref`
//! - [`text`]: LLM-backed recap, quiz and analysis generators
//! - [`fallback`]: deterministic local stand-ins
//! - [`prompts`]: tera prompt templates
//! - [`hooks`]: follow-up work after an analysis completes

pub mod fallback;
pub mod hooks;
pub mod outputs;
pub mod prompts;
pub mod text;

pub use fallback::{
    character_names, split_sentences, ExtractiveAnalysis, ExtractiveQuiz, ExtractiveRecap,
    PlaceholderImage,
};
pub use hooks::DiscoverCharacters;
pub use outputs::{
    AssetSource, ChapterAnalysis, CharacterNote, ImageAsset, Quiz, QuizQuestion, Recap,
};
pub use text::{LlmTextGenerator, TextModelSettings};
