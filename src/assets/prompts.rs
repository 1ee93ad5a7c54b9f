//! Prompt templates, rendered with tera.

use tera::{Context, Tera};

use crate::catalog::{Chapter, Character};
use crate::error::GeneratorError;

/// Chapter text beyond this many characters is cut before prompting.
pub const MAX_CHAPTER_CHARS: usize = 12_000;

pub const TEXT_SYSTEM_PROMPT: &str =
    "You are a careful literary assistant. Reply with a single JSON object and nothing else.";

pub const RECAP_PROMPT: &str = r#"
Write a short "previously on" recap of chapter {{ number }} ("{{ title }}") for a reader
returning to the book. Do not reveal anything beyond this chapter.

Chapter text:
{{ text }}

Reply as JSON: {"summary": "<2-4 sentences>", "key_points": ["<point>", ...]}
"#;

pub const QUIZ_PROMPT: &str = r#"
Write {{ questions }} multiple-choice comprehension questions about chapter {{ number }}
("{{ title }}"). Each question has 3 or 4 options and exactly one correct answer.

Chapter text:
{{ text }}

Reply as JSON: {"questions": [{"question": "...", "options": ["...", "..."], "answer": <index of correct option>}]}
"#;

pub const ANALYSIS_PROMPT: &str = r#"
Analyse chapter {{ number }} ("{{ title }}"). Summarize it, name its main themes, and list
the characters who appear with a one-sentence visual description of each.

Chapter text:
{{ text }}

Reply as JSON: {"summary": "...", "themes": ["..."], "characters": [{"name": "...", "description": "..."}]}
"#;

pub const ILLUSTRATION_PROMPT: &str = "book illustration, {{ title }}, {{ scene }}, \
detailed ink and watercolor, soft lighting";

pub const PORTRAIT_PROMPT: &str = "character portrait of {{ name }}{% if description %}, \
{{ description }}{% endif %}, head and shoulders, painterly, neutral background";

pub const IMAGE_NEGATIVE_PROMPT: &str = "text, watermark, signature, blurry, deformed";

fn chapter_context(chapter: &Chapter, max_chars: usize) -> Context {
    let mut context = Context::new();
    context.insert("number", &chapter.number);
    context.insert("title", &chapter.title);
    context.insert("text", &truncate(&chapter.text, max_chars));
    context
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\n[...]", &text[..idx]),
        None => text.to_string(),
    }
}

pub fn render_recap_prompt(chapter: &Chapter) -> Result<String, GeneratorError> {
    let context = chapter_context(chapter, MAX_CHAPTER_CHARS);
    Ok(Tera::one_off(RECAP_PROMPT, &context, false)?)
}

pub fn render_quiz_prompt(chapter: &Chapter, questions: usize) -> Result<String, GeneratorError> {
    let mut context = chapter_context(chapter, MAX_CHAPTER_CHARS);
    context.insert("questions", &questions);
    Ok(Tera::one_off(QUIZ_PROMPT, &context, false)?)
}

pub fn render_analysis_prompt(chapter: &Chapter) -> Result<String, GeneratorError> {
    let context = chapter_context(chapter, MAX_CHAPTER_CHARS);
    Ok(Tera::one_off(ANALYSIS_PROMPT, &context, false)?)
}

/// Image prompt for a chapter; the scene is the chapter's opening.
pub fn render_illustration_prompt(chapter: &Chapter) -> Result<String, GeneratorError> {
    let mut context = Context::new();
    context.insert("title", &chapter.title);
    context.insert("scene", &truncate(chapter.text.trim(), 300));
    Ok(Tera::one_off(ILLUSTRATION_PROMPT, &context, false)?)
}

pub fn render_portrait_prompt(character: &Character) -> Result<String, GeneratorError> {
    let mut context = Context::new();
    context.insert("name", &character.name);
    context.insert("description", &character.description.trim());
    Ok(Tera::one_off(PORTRAIT_PROMPT, &context, false)?)
}
