//! Book, chapter and character rows.

use serde::{Deserialize, Serialize};

use crate::pipeline::Target;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: Option<String>,
}

/// A chapter; target of illustrations, recaps, quizzes and analyses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub book_id: i64,
    /// 1-based position in the book.
    pub number: i64,
    pub title: String,
    pub text: String,
}

impl Target for Chapter {
    fn id(&self) -> i64 {
        self.id
    }

    fn book_id(&self) -> i64 {
        self.book_id
    }
}

/// A character; target of portraits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: i64,
    pub book_id: i64,
    pub name: String,
    pub description: String,
}

impl Target for Character {
    fn id(&self) -> i64 {
        self.id
    }

    fn book_id(&self) -> i64 {
        self.book_id
    }
}

/// JSON layout accepted by `folio-forge import`.
#[derive(Debug, Clone, Deserialize)]
pub struct BookImport {
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    pub chapters: Vec<ChapterImport>,
    #[serde(default)]
    pub characters: Vec<CharacterImport>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChapterImport {
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CharacterImport {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_defaults() {
        let import: BookImport = serde_json::from_str(
            r#"{"title": "Persuasion", "chapters": [{"title": "I", "text": "Sir Walter Elliot..."}]}"#,
        )
        .expect("parse");
        assert!(import.author.is_none());
        assert!(import.characters.is_empty());
        assert_eq!(import.chapters.len(), 1);
    }
}
