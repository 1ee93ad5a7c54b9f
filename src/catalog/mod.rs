//! Books and the targets assets are generated for.
//!
//! Chapters and characters only need to exist and carry enough text for a
//! generator to work from.

pub mod models;
pub mod repository;

pub use models::{Book, BookImport, Chapter, ChapterImport, Character, CharacterImport};
pub use repository::Catalog;
