//! Output types stored in `output_ref`.
//!
//! Images are stored by file name; text assets as compact JSON.

use serde::{Deserialize, Serialize};

use crate::error::GeneratorError;
use crate::pipeline::AssetOutput;

/// Where an output came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetSource {
    #[default]
    Generated,
    Fallback,
}

/// An image written under the asset directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    /// Path relative to the asset directory.
    pub file_name: String,
    pub source: AssetSource,
}

impl ImageAsset {
    pub fn generated(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            source: AssetSource::Generated,
        }
    }

    pub fn placeholder(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            source: AssetSource::Fallback,
        }
    }
}

impl AssetOutput for ImageAsset {
    fn output_ref(&self) -> Result<String, GeneratorError> {
        if self.file_name.trim().is_empty() {
            return Err(GeneratorError::MalformedOutput(
                "image has no file name".to_string(),
            ));
        }
        Ok(self.file_name.clone())
    }
}

/// "Previously on" summary of a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recap {
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub source: AssetSource,
}

impl AssetOutput for Recap {
    fn output_ref(&self) -> Result<String, GeneratorError> {
        if self.summary.trim().is_empty() {
            return Err(GeneratorError::MalformedOutput(
                "recap summary is empty".to_string(),
            ));
        }
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    /// Index into `options`.
    pub answer: usize,
}

impl QuizQuestion {
    fn check(&self) -> Result<(), String> {
        if self.question.trim().is_empty() {
            return Err("question text is empty".to_string());
        }
        if self.options.len() < 2 {
            return Err(format!("'{}' has fewer than two options", self.question));
        }
        if self.answer >= self.options.len() {
            return Err(format!(
                "'{}' answer index {} out of range",
                self.question, self.answer
            ));
        }
        Ok(())
    }
}

/// Comprehension quiz for a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub questions: Vec<QuizQuestion>,
    #[serde(default)]
    pub source: AssetSource,
}

impl AssetOutput for Quiz {
    fn output_ref(&self) -> Result<String, GeneratorError> {
        if self.questions.is_empty() {
            return Err(GeneratorError::MalformedOutput(
                "quiz has no questions".to_string(),
            ));
        }
        for question in &self.questions {
            question.check().map_err(GeneratorError::MalformedOutput)?;
        }
        Ok(serde_json::to_string(self)?)
    }
}

/// A character mentioned in a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterNote {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Themes and characters of a chapter.
///
/// Characters found here are added to the catalog and get portraits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterAnalysis {
    pub summary: String,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub characters: Vec<CharacterNote>,
    #[serde(default)]
    pub source: AssetSource,
}

impl AssetOutput for ChapterAnalysis {
    fn output_ref(&self) -> Result<String, GeneratorError> {
        if self.summary.trim().is_empty() {
            return Err(GeneratorError::MalformedOutput(
                "analysis summary is empty".to_string(),
            ));
        }
        if self.characters.iter().any(|c| c.name.trim().is_empty()) {
            return Err(GeneratorError::MalformedOutput(
                "analysis lists a character without a name".to_string(),
            ));
        }
        Ok(serde_json::to_string(self)?)
    }
}
