//! Local fallbacks used when a generator is unavailable.
//!
//! Text assets are extracted from the chapter itself: leading sentences for
//! summaries, fill-in-the-blank questions built from character names, word
//! frequency for themes. Images fall back to a fixed placeholder file per
//! kind. Everything here is deterministic for a given input.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;

use super::outputs::{
    AssetSource, ChapterAnalysis, CharacterNote, ImageAsset, Quiz, QuizQuestion, Recap,
};
use crate::catalog::{Chapter, Character};
use crate::pipeline::FallbackGenerator;

const BLANK: &str = "_____";

/// Capitalized words that start phrases rather than name people.
const NAME_STOPWORDS: &[&str] = &[
    "A", "An", "And", "As", "At", "But", "Chapter", "For", "He", "Her", "His", "I", "If", "In",
    "It", "Its", "Miss", "Mr", "Mrs", "No", "Of", "On", "Or", "She", "So", "That", "The", "Their",
    "Then", "There", "They", "This", "To", "We", "What", "When", "Where", "Who", "Yes", "You",
];

const THEME_STOPWORDS: &[&str] = &[
    "about", "after", "again", "against", "always", "because", "before", "being", "could",
    "every", "might", "never", "other", "should", "shall", "still", "their", "there", "these",
    "thing", "things", "those", "through", "under", "until", "where", "which", "while", "would",
];

fn sentence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"[^.!?]+(?:[.!?]+["'”’)]*|$)"#).expect("Invalid regex for sentences")
    })
}

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)*\b").expect("Invalid regex for names")
    })
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z]+").expect("Invalid regex for words"))
}

/// Splits prose into trimmed sentences, keeping an unterminated tail.
pub fn split_sentences(text: &str) -> Vec<String> {
    sentence_re()
        .find_iter(text)
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Character-like names in `text`, most frequent first.
///
/// A name qualifies only if it appears at least once away from the start of
/// a sentence, which filters out ordinary capitalized sentence openers.
pub fn character_names(text: &str) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut mid_sentence: BTreeSet<String> = BTreeSet::new();

    for sentence in split_sentences(text) {
        for m in name_re().find_iter(&sentence) {
            let words: Vec<&str> = m.as_str().split_whitespace().collect();
            let kept: Vec<&str> = words
                .iter()
                .copied()
                .skip_while(|w| NAME_STOPWORDS.contains(w))
                .collect();
            if kept.is_empty() {
                continue;
            }
            let name = kept.join(" ");
            if m.start() > 0 || kept.len() < words.len() {
                mid_sentence.insert(name.clone());
            }
            *counts.entry(name).or_default() += 1;
        }
    }

    let mut names: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(name, _)| mid_sentence.contains(name))
        .collect();
    names.sort_by(|(a, ca), (b, cb)| cb.cmp(ca).then_with(|| a.cmp(b)));
    names
}

fn lead_summary(chapter: &Chapter, sentences: &[String]) -> String {
    if sentences.is_empty() {
        return format!("Chapter {}: {}", chapter.number, chapter.title);
    }
    sentences.iter().take(2).cloned().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Recap from the chapter's leading sentences.
#[derive(Debug, Clone)]
pub struct ExtractiveRecap {
    pub max_points: usize,
}

impl Default for ExtractiveRecap {
    fn default() -> Self {
        Self { max_points: 3 }
    }
}

impl FallbackGenerator<Chapter, Recap> for ExtractiveRecap {
    fn build(&self, chapter: &Chapter) -> Recap {
        let sentences = split_sentences(&chapter.text);
        let rest = sentences.get(2..).unwrap_or_default();
        let step = (rest.len() / self.max_points.max(1)).max(1);

        Recap {
            summary: lead_summary(chapter, &sentences),
            key_points: rest
                .iter()
                .step_by(step)
                .take(self.max_points)
                .cloned()
                .collect(),
            source: AssetSource::Fallback,
        }
    }
}

/// Fill-in-the-blank quiz over character names.
#[derive(Debug, Clone)]
pub struct ExtractiveQuiz {
    pub max_questions: usize,
}

impl Default for ExtractiveQuiz {
    fn default() -> Self {
        Self { max_questions: 3 }
    }
}

impl ExtractiveQuiz {
    fn title_question(chapter: &Chapter) -> QuizQuestion {
        QuizQuestion {
            question: format!(
                "True or false: chapter {} is titled \"{}\".",
                chapter.number, chapter.title
            ),
            options: vec!["True".to_string(), "False".to_string()],
            answer: 0,
        }
    }
}

impl FallbackGenerator<Chapter, Quiz> for ExtractiveQuiz {
    fn build(&self, chapter: &Chapter) -> Quiz {
        let names: Vec<String> = character_names(&chapter.text)
            .into_iter()
            .map(|(name, _)| name)
            .collect();

        let mut questions = Vec::new();
        if names.len() >= 2 {
            for sentence in split_sentences(&chapter.text) {
                if questions.len() >= self.max_questions {
                    break;
                }
                let Some(name) = names
                    .iter()
                    .filter_map(|n| sentence.find(n.as_str()).map(|pos| (pos, n)))
                    .min_by_key(|(pos, _)| *pos)
                    .map(|(_, n)| n)
                else {
                    continue;
                };

                let mut options: Vec<String> = std::iter::once(name.clone())
                    .chain(names.iter().filter(|n| *n != name).take(3).cloned())
                    .collect();
                options.sort();
                let answer = options.iter().position(|o| o == name).unwrap_or(0);

                questions.push(QuizQuestion {
                    question: format!("Fill in the blank: {}", sentence.replacen(name, BLANK, 1)),
                    options,
                    answer,
                });
            }
        }

        if questions.is_empty() {
            questions.push(Self::title_question(chapter));
        }

        Quiz {
            questions,
            source: AssetSource::Fallback,
        }
    }
}

/// Analysis from sentence extraction and word frequency.
#[derive(Debug, Clone)]
pub struct ExtractiveAnalysis {
    pub max_characters: usize,
    pub max_themes: usize,
}

impl Default for ExtractiveAnalysis {
    fn default() -> Self {
        Self {
            max_characters: 5,
            max_themes: 3,
        }
    }
}

impl ExtractiveAnalysis {
    fn themes(&self, text: &str, names: &[String]) -> Vec<String> {
        let name_words: BTreeSet<String> = names
            .iter()
            .flat_map(|n| n.split_whitespace())
            .map(str::to_lowercase)
            .collect();

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for m in word_re().find_iter(text) {
            let word = m.as_str().to_lowercase();
            if word.len() < 5
                || THEME_STOPWORDS.contains(&word.as_str())
                || name_words.contains(&word)
            {
                continue;
            }
            *counts.entry(word).or_default() += 1;
        }

        let mut ranked: Vec<(String, usize)> =
            counts.into_iter().filter(|(_, c)| *c >= 2).collect();
        ranked.sort_by(|(a, ca), (b, cb)| cb.cmp(ca).then_with(|| a.cmp(b)));
        ranked
            .into_iter()
            .take(self.max_themes)
            .map(|(w, _)| w)
            .collect()
    }
}

impl FallbackGenerator<Chapter, ChapterAnalysis> for ExtractiveAnalysis {
    fn build(&self, chapter: &Chapter) -> ChapterAnalysis {
        let sentences = split_sentences(&chapter.text);
        let names: Vec<String> = character_names(&chapter.text)
            .into_iter()
            .take(self.max_characters)
            .map(|(name, _)| name)
            .collect();

        let characters = names
            .iter()
            .map(|name| CharacterNote {
                name: name.clone(),
                description: sentences
                    .iter()
                    .find(|s| s.contains(name.as_str()))
                    .map(|s| truncate_chars(s, 200))
                    .unwrap_or_default(),
            })
            .collect();

        ChapterAnalysis {
            summary: lead_summary(chapter, &sentences),
            themes: self.themes(&chapter.text, &names),
            characters,
            source: AssetSource::Fallback,
        }
    }
}

/// Fixed placeholder image for one asset kind.
#[derive(Debug, Clone)]
pub struct PlaceholderImage {
    file_name: String,
}

impl PlaceholderImage {
    pub fn new(label: &str) -> Self {
        Self {
            file_name: format!("placeholders/{}.png", label),
        }
    }
}

impl FallbackGenerator<Chapter, ImageAsset> for PlaceholderImage {
    fn build(&self, _chapter: &Chapter) -> ImageAsset {
        ImageAsset::placeholder(self.file_name.clone())
    }
}

impl FallbackGenerator<Character, ImageAsset> for PlaceholderImage {
    fn build(&self, _character: &Character) -> ImageAsset {
        ImageAsset::placeholder(self.file_name.clone())
    }
}
