//! LLM-backed generators for recaps, quizzes and chapter analyses.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::outputs::{AssetSource, ChapterAnalysis, Quiz, Recap};
use super::prompts::{
    render_analysis_prompt, render_quiz_prompt, render_recap_prompt, TEXT_SYSTEM_PROMPT,
};
use crate::catalog::Chapter;
use crate::error::{GeneratorError, LlmError};
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::pipeline::Generator;
use crate::utils::parse_json_reply;

/// Sampling settings shared by the text generators.
#[derive(Debug, Clone)]
pub struct TextModelSettings {
    /// Empty selects the provider's default model.
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub quiz_questions: usize,
}

impl Default for TextModelSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.7,
            max_tokens: 2048,
            quiz_questions: 5,
        }
    }
}

/// One generator value serving all chapter text kinds.
///
/// With no provider configured it reports itself unavailable, and the
/// pipelines use their extractive fallbacks.
#[derive(Clone)]
pub struct LlmTextGenerator {
    provider: Option<Arc<dyn LlmProvider>>,
    settings: TextModelSettings,
}

impl LlmTextGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: TextModelSettings) -> Self {
        Self {
            provider: Some(provider),
            settings,
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            provider: None,
            settings: TextModelSettings::default(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    async fn complete<R: DeserializeOwned>(&self, prompt: String) -> Result<R, GeneratorError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| GeneratorError::Unavailable("no LLM provider configured".to_string()))?;

        let request = GenerationRequest::new(
            self.settings.model.clone(),
            vec![Message::system(TEXT_SYSTEM_PROMPT), Message::user(prompt)],
        )
        .with_temperature(self.settings.temperature)
        .with_max_tokens(self.settings.max_tokens)
        .with_json_output();

        let response = provider.generate(request).await?;
        let content = response
            .first_content()
            .ok_or_else(|| LlmError::EmptyCompletion(response.model.clone()))?;

        debug!(model = %response.model, chars = content.len(), "Parsing model reply");
        parse_json_reply(content).map_err(|e| GeneratorError::MalformedOutput(e.to_string()))
    }
}

#[async_trait]
impl Generator<Chapter, Recap> for LlmTextGenerator {
    fn name(&self) -> &str {
        "llm-recap"
    }

    async fn is_available(&self) -> bool {
        self.is_configured()
    }

    async fn generate(&self, chapter: &Chapter) -> Result<Recap, GeneratorError> {
        let mut recap: Recap = self.complete(render_recap_prompt(chapter)?).await?;
        recap.source = AssetSource::Generated;
        Ok(recap)
    }
}

#[async_trait]
impl Generator<Chapter, Quiz> for LlmTextGenerator {
    fn name(&self) -> &str {
        "llm-quiz"
    }

    async fn is_available(&self) -> bool {
        self.is_configured()
    }

    async fn generate(&self, chapter: &Chapter) -> Result<Quiz, GeneratorError> {
        let prompt = render_quiz_prompt(chapter, self.settings.quiz_questions)?;
        let mut quiz: Quiz = self.complete(prompt).await?;
        quiz.source = AssetSource::Generated;
        Ok(quiz)
    }
}

#[async_trait]
impl Generator<Chapter, ChapterAnalysis> for LlmTextGenerator {
    fn name(&self) -> &str {
        "llm-analysis"
    }

    async fn is_available(&self) -> bool {
        self.is_configured()
    }

    async fn generate(&self, chapter: &Chapter) -> Result<ChapterAnalysis, GeneratorError> {
        let mut analysis: ChapterAnalysis =
            self.complete(render_analysis_prompt(chapter)?).await?;
        analysis.source = AssetSource::Generated;
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Choice, GenerationResponse, Usage};
    use std::sync::Mutex;

    struct ScriptedProvider {
        reply: String,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedProvider {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            Ok(GenerationResponse {
                id: "r1".to_string(),
                model: "scripted".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(self.reply.clone()),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    fn chapter() -> Chapter {
        Chapter {
            id: 4,
            book_id: 1,
            number: 1,
            title: "Down the Rabbit-Hole".to_string(),
            text: "Alice saw a rabbit.".to_string(),
        }
    }

    #[tokio::test]
    async fn test_recap_from_fenced_reply() {
        let provider = ScriptedProvider::new(
            "Sure!\n```json\n{\"summary\": \"Alice follows a rabbit.\", \"key_points\": [\"A rabbit\"]}\n```",
        );
        let generator = LlmTextGenerator::new(provider.clone(), TextModelSettings::default());

        assert!(Generator::<Chapter, Recap>::is_available(&generator).await);
        let recap = Generator::<Chapter, Recap>::generate(&generator, &chapter())
            .await
            .unwrap();
        assert_eq!(recap.summary, "Alice follows a rabbit.");
        assert_eq!(recap.source, AssetSource::Generated);

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].role, "system");
        assert!(requests[0].messages[1].content.contains("Alice saw a rabbit."));
    }

    #[tokio::test]
    async fn test_quiz_reply_shape() {
        let provider = ScriptedProvider::new(
            r#"{"questions": [{"question": "Who runs?", "options": ["Alice", "Rabbit"], "answer": 1}]}"#,
        );
        let generator = LlmTextGenerator::new(provider, TextModelSettings::default());
        let quiz = Generator::<Chapter, Quiz>::generate(&generator, &chapter())
            .await
            .unwrap();
        assert_eq!(quiz.questions[0].options[quiz.questions[0].answer], "Rabbit");
    }

    #[tokio::test]
    async fn test_malformed_reply() {
        let provider = ScriptedProvider::new("I would rather not.");
        let generator = LlmTextGenerator::new(provider, TextModelSettings::default());
        let result = Generator::<Chapter, ChapterAnalysis>::generate(&generator, &chapter()).await;
        assert!(matches!(result, Err(GeneratorError::MalformedOutput(_))));
    }

    #[tokio::test]
    async fn test_empty_reply() {
        let provider = ScriptedProvider::new("  ");
        let generator = LlmTextGenerator::new(provider, TextModelSettings::default());
        let result = Generator::<Chapter, Recap>::generate(&generator, &chapter()).await;
        assert!(matches!(
            result,
            Err(GeneratorError::Llm(LlmError::EmptyCompletion(_)))
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_is_unavailable() {
        let generator = LlmTextGenerator::unconfigured();
        assert!(!Generator::<Chapter, Quiz>::is_available(&generator).await);
        let result = Generator::<Chapter, Quiz>::generate(&generator, &chapter()).await;
        assert!(matches!(result, Err(GeneratorError::Unavailable(_))));
    }
}
