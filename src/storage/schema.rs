//! Database schema constants.
//!
//! This module contains all SQL schema definitions for the SQLite storage
//! backend. Timestamps are stored as Unix milliseconds (`INTEGER`) so that
//! staleness comparisons are exact in SQL.

/// SQL schema for creating the books table.
pub const CREATE_BOOKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS books (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    title       TEXT    NOT NULL,
    author      TEXT,
    created_at  INTEGER NOT NULL
)
"#;

/// SQL schema for creating the chapters table.
pub const CREATE_CHAPTERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS chapters (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    book_id     INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
    number      INTEGER NOT NULL,
    title       TEXT    NOT NULL,
    text        TEXT    NOT NULL,
    UNIQUE(book_id, number)
)
"#;

/// SQL schema for creating the characters table.
pub const CREATE_CHARACTERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS characters (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    book_id     INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
    name        TEXT    NOT NULL,
    description TEXT    NOT NULL DEFAULT '',
    UNIQUE(book_id, name)
)
"#;

/// SQL schema for creating the reading_progress table.
pub const CREATE_READING_PROGRESS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS reading_progress (
    book_id     INTEGER PRIMARY KEY REFERENCES books(id) ON DELETE CASCADE,
    chapter_id  INTEGER NOT NULL REFERENCES chapters(id) ON DELETE CASCADE,
    updated_at  INTEGER NOT NULL
)
"#;

/// SQL schema for creating the generation_records table.
///
/// The primary key is the concurrency control primitive of the pipeline:
/// two racing creators for the same `(kind, target_id)` cannot both succeed.
/// `status` is nullable to accommodate rows written before status tracking.
pub const CREATE_GENERATION_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS generation_records (
    kind          TEXT    NOT NULL,
    target_id     INTEGER NOT NULL,
    book_id       INTEGER NOT NULL,
    status        TEXT,
    output_ref    TEXT,
    error_message TEXT,
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL,
    completed_at  INTEGER,
    PRIMARY KEY (kind, target_id)
)
"#;

/// SQL for creating all required indexes.
pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_chapters_book_id ON chapters(book_id);
CREATE INDEX IF NOT EXISTS idx_characters_book_id ON characters(book_id);
CREATE INDEX IF NOT EXISTS idx_generation_records_status ON generation_records(kind, status, updated_at);
CREATE INDEX IF NOT EXISTS idx_generation_records_book ON generation_records(kind, book_id)
"#;

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_BOOKS_TABLE,
        CREATE_CHAPTERS_TABLE,
        CREATE_CHARACTERS_TABLE,
        CREATE_READING_PROGRESS_TABLE,
        CREATE_GENERATION_RECORDS_TABLE,
        CREATE_INDEXES,
    ]
}

/// Table names in the schema.
pub mod tables {
    pub const BOOKS: &str = "books";
    pub const CHAPTERS: &str = "chapters";
    pub const CHARACTERS: &str = "characters";
    pub const READING_PROGRESS: &str = "reading_progress";
    pub const GENERATION_RECORDS: &str = "generation_records";
}
