//! SQLite access to books, chapters, characters and reading progress.
//!
//! `Catalog` is also the `TargetRepository` for both target types, so the
//! pipelines validate and load targets straight from these tables.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::info;

use super::models::{Book, BookImport, Chapter, Character};
use crate::pipeline::TargetRepository;
use crate::storage::{now_millis, Database, DatabaseError};

/// Book catalog backed by the shared database.
#[derive(Clone)]
pub struct Catalog {
    db: Database,
}

impl Catalog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn insert_book(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> Result<Book, DatabaseError> {
        let result = sqlx::query("INSERT INTO books (title, author, created_at) VALUES (?1, ?2, ?3)")
            .bind(title)
            .bind(author)
            .bind(now_millis())
            .execute(self.db.pool())
            .await?;

        Ok(Book {
            id: result.last_insert_rowid(),
            title: title.to_string(),
            author: author.map(str::to_string),
        })
    }

    pub async fn insert_chapter(
        &self,
        book_id: i64,
        number: i64,
        title: &str,
        text: &str,
    ) -> Result<Chapter, DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO chapters (book_id, number, title, text) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(book_id)
        .bind(number)
        .bind(title)
        .bind(text)
        .execute(self.db.pool())
        .await?;

        Ok(Chapter {
            id: result.last_insert_rowid(),
            book_id,
            number,
            title: title.to_string(),
            text: text.to_string(),
        })
    }

    /// Imports a whole book in one transaction.
    pub async fn import_book(&self, import: &BookImport) -> Result<Book, DatabaseError> {
        let mut tx = self.db.begin().await?;

        let book_id = sqlx::query(
            "INSERT INTO books (title, author, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(&import.title)
        .bind(&import.author)
        .bind(now_millis())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (idx, chapter) in import.chapters.iter().enumerate() {
            sqlx::query(
                "INSERT INTO chapters (book_id, number, title, text) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(book_id)
            .bind(idx as i64 + 1)
            .bind(&chapter.title)
            .bind(&chapter.text)
            .execute(&mut *tx)
            .await?;
        }

        for character in &import.characters {
            sqlx::query(
                "INSERT INTO characters (book_id, name, description) VALUES (?1, ?2, ?3)
                 ON CONFLICT(book_id, name) DO NOTHING",
            )
            .bind(book_id)
            .bind(&character.name)
            .bind(&character.description)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            book_id = book_id,
            title = %import.title,
            chapters = import.chapters.len(),
            characters = import.characters.len(),
            "Imported book"
        );
        Ok(Book {
            id: book_id,
            title: import.title.clone(),
            author: import.author.clone(),
        })
    }

    pub async fn get_book(&self, id: i64) -> Result<Option<Book>, DatabaseError> {
        let row = sqlx::query("SELECT id, title, author FROM books WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.map(|row| Book {
            id: row.get("id"),
            title: row.get("title"),
            author: row.get("author"),
        }))
    }

    pub async fn list_books(&self) -> Result<Vec<Book>, DatabaseError> {
        let rows = sqlx::query("SELECT id, title, author FROM books ORDER BY id")
            .fetch_all(self.db.pool())
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Book {
                id: row.get("id"),
                title: row.get("title"),
                author: row.get("author"),
            })
            .collect())
    }

    pub async fn get_chapter(&self, id: i64) -> Result<Option<Chapter>, DatabaseError> {
        let row = sqlx::query("SELECT id, book_id, number, title, text FROM chapters WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.as_ref().map(map_chapter))
    }

    /// Chapter at `number` in a book; used to find neighbours.
    pub async fn chapter_by_number(
        &self,
        book_id: i64,
        number: i64,
    ) -> Result<Option<Chapter>, DatabaseError> {
        let row = sqlx::query(
            "SELECT id, book_id, number, title, text FROM chapters
             WHERE book_id = ?1 AND number = ?2",
        )
        .bind(book_id)
        .bind(number)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(map_chapter))
    }

    /// Chapters of a book in reading order.
    pub async fn chapters(&self, book_id: i64) -> Result<Vec<Chapter>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT id, book_id, number, title, text FROM chapters
             WHERE book_id = ?1 ORDER BY number",
        )
        .bind(book_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(map_chapter).collect())
    }

    pub async fn get_character(&self, id: i64) -> Result<Option<Character>, DatabaseError> {
        let row =
            sqlx::query("SELECT id, book_id, name, description FROM characters WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(row.as_ref().map(map_character))
    }

    pub async fn characters(&self, book_id: i64) -> Result<Vec<Character>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT id, book_id, name, description FROM characters
             WHERE book_id = ?1 ORDER BY name",
        )
        .bind(book_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(map_character).collect())
    }

    /// Inserts a character unless one with the same name exists in the book.
    ///
    /// Returns the stored character and whether it was newly created. An
    /// existing character keeps its description unless it was empty.
    pub async fn upsert_character(
        &self,
        book_id: i64,
        name: &str,
        description: &str,
    ) -> Result<(Character, bool), DatabaseError> {
        let inserted = sqlx::query(
            "INSERT INTO characters (book_id, name, description) VALUES (?1, ?2, ?3)
             ON CONFLICT(book_id, name) DO NOTHING",
        )
        .bind(book_id)
        .bind(name)
        .bind(description)
        .execute(self.db.pool())
        .await?
        .rows_affected()
            > 0;

        if !inserted && !description.is_empty() {
            sqlx::query(
                "UPDATE characters SET description = ?3
                 WHERE book_id = ?1 AND name = ?2 AND description = ''",
            )
            .bind(book_id)
            .bind(name)
            .bind(description)
            .execute(self.db.pool())
            .await?;
        }

        let row = sqlx::query(
            "SELECT id, book_id, name, description FROM characters
             WHERE book_id = ?1 AND name = ?2",
        )
        .bind(book_id)
        .bind(name)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("character '{}' in book {}", name, book_id)))?;

        Ok((map_character(&row), inserted))
    }

    /// Records the reader's position inside the caller's transaction.
    pub async fn record_progress(
        conn: &mut SqliteConnection,
        book_id: i64,
        chapter_id: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO reading_progress (book_id, chapter_id, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(book_id) DO UPDATE SET
                chapter_id = excluded.chapter_id,
                updated_at = excluded.updated_at",
        )
        .bind(book_id)
        .bind(chapter_id)
        .bind(now_millis())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Chapter id the reader last opened in a book.
    pub async fn reading_progress(&self, book_id: i64) -> Result<Option<i64>, DatabaseError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT chapter_id FROM reading_progress WHERE book_id = ?1")
                .bind(book_id)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(row.map(|(id,)| id))
    }
}

fn map_chapter(row: &SqliteRow) -> Chapter {
    Chapter {
        id: row.get("id"),
        book_id: row.get("book_id"),
        number: row.get("number"),
        title: row.get("title"),
        text: row.get("text"),
    }
}

fn map_character(row: &SqliteRow) -> Character {
    Character {
        id: row.get("id"),
        book_id: row.get("book_id"),
        name: row.get("name"),
        description: row.get("description"),
    }
}

#[async_trait]
impl TargetRepository<Chapter> for Catalog {
    async fn find(&self, id: i64) -> Result<Option<Chapter>, DatabaseError> {
        self.get_chapter(id).await
    }
}

#[async_trait]
impl TargetRepository<Character> for Catalog {
    async fn find(&self, id: i64) -> Result<Option<Character>, DatabaseError> {
        self.get_character(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::models::{ChapterImport, CharacterImport};

    async fn open_catalog() -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::open_path(&dir.path().join("catalog.db"))
            .await
            .expect("open database");
        (dir, Catalog::new(db))
    }

    #[tokio::test]
    async fn test_import_numbers_chapters_in_order() {
        let (_dir, catalog) = open_catalog().await;
        let import = BookImport {
            title: "Middlemarch".to_string(),
            author: Some("George Eliot".to_string()),
            chapters: vec![
                ChapterImport {
                    title: "Prelude".to_string(),
                    text: "Who that cares much to know the history of man...".to_string(),
                },
                ChapterImport {
                    title: "Chapter I".to_string(),
                    text: "Miss Brooke had that kind of beauty...".to_string(),
                },
            ],
            characters: vec![CharacterImport {
                name: "Dorothea Brooke".to_string(),
                description: String::new(),
            }],
        };

        let book = catalog.import_book(&import).await.expect("import");
        let chapters = catalog.chapters(book.id).await.expect("chapters");
        assert_eq!(
            chapters.iter().map(|c| c.number).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(catalog.characters(book.id).await.expect("characters").len(), 1);

        let second = catalog
            .chapter_by_number(book.id, 2)
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(second.title, "Chapter I");
        assert!(catalog
            .chapter_by_number(book.id, 3)
            .await
            .expect("lookup")
            .is_none());
    }

    #[tokio::test]
    async fn test_upsert_character_reports_creation() {
        let (_dir, catalog) = open_catalog().await;
        let book = catalog.insert_book("Emma", None).await.expect("book");

        let (first, created) = catalog
            .upsert_character(book.id, "Harriet Smith", "")
            .await
            .expect("insert");
        assert!(created);

        let (again, created) = catalog
            .upsert_character(book.id, "Harriet Smith", "Emma's protégée")
            .await
            .expect("upsert");
        assert!(!created);
        assert_eq!(again.id, first.id);
        assert_eq!(again.description, "Emma's protégée");
    }

    #[tokio::test]
    async fn test_targets_resolve_through_repository() {
        let (_dir, catalog) = open_catalog().await;
        let book = catalog.insert_book("Emma", None).await.expect("book");
        let chapter = catalog
            .insert_chapter(book.id, 1, "I", "Emma Woodhouse, handsome, clever, and rich...")
            .await
            .expect("chapter");

        let found: Option<Chapter> = TargetRepository::<Chapter>::find(&catalog, chapter.id)
            .await
            .expect("find");
        assert_eq!(found, Some(chapter));
        let missing: Option<Character> = TargetRepository::<Character>::find(&catalog, 404)
            .await
            .expect("find");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_record_progress_upserts() {
        let (_dir, catalog) = open_catalog().await;
        let book = catalog.insert_book("Emma", None).await.expect("book");
        let one = catalog.insert_chapter(book.id, 1, "I", "...").await.expect("chapter");
        let two = catalog.insert_chapter(book.id, 2, "II", "...").await.expect("chapter");

        for chapter in [&one, &two] {
            let mut tx = catalog.database().begin().await.expect("begin");
            Catalog::record_progress(&mut tx, book.id, chapter.id)
                .await
                .expect("progress");
            tx.commit().await.expect("commit");
        }
        assert_eq!(
            catalog.reading_progress(book.id).await.expect("progress"),
            Some(two.id)
        );
    }
}
