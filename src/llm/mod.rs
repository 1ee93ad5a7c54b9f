//! LLM integration.
//!
//! A thin OpenAI-compatible client behind the [`LlmProvider`] trait. The text
//! generators in [`crate::assets`] only depend on the trait, so tests can
//! substitute scripted providers.
//!
//! ```ignore
//! use folio_forge::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new("", vec![Message::user("Summarize chapter one")]);
//! let response = client.generate(request).await?;
//! ```

pub mod litellm;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message,
    ResponseFormat, Usage,
};
