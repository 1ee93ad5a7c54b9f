//! SQLite database client for persistent storage.
//!
//! This module provides the connection pool shared by the catalog and the
//! generation record stores. Every store method runs in its own transaction
//! (autocommit or an explicit `pool.begin()`), so writes made by workers are
//! visible to other connections as soon as they return.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use super::migrations::MigrationRunner;
use crate::pipeline::AssetKind;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// A generation record already exists for this target.
    #[error("{kind} record for target {target_id} already exists")]
    AlreadyExists { kind: AssetKind, target_id: i64 },

    /// Record not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A row could not be mapped back into a domain value.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] super::migrations::MigrationError),
}

impl DatabaseError {
    /// Returns true when the underlying driver reported a uniqueness violation.
    pub fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

/// SQLite database client.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connects to the database and returns a new client.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite://folio.db")
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        tracing::info!(url = database_url, "Database opened");
        Ok(Self { pool })
    }

    /// Opens (creating if needed) a database file and applies the schema.
    pub async fn open_path(path: &std::path::Path) -> Result<Self, DatabaseError> {
        let url = format!("sqlite://{}", path.display());
        let db = Self::connect(&url).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Creates a new database client from an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let runner = MigrationRunner::new(self.pool.clone());
        runner.run_migrations().await?;
        Ok(())
    }

    /// Begins a caller-owned transaction.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, DatabaseError> {
        Ok(self.pool.begin().await?)
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Current time as Unix milliseconds, the storage representation of timestamps.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Converts stored Unix milliseconds back to a UTC timestamp.
pub fn from_millis(millis: i64) -> Result<DateTime<Utc>, DatabaseError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| DatabaseError::CorruptRow(format!("invalid timestamp {}", millis)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_roundtrip_is_exact() {
        let now = now_millis();
        let ts = from_millis(now).expect("valid timestamp");
        assert_eq!(ts.timestamp_millis(), now);
    }

    #[test]
    fn test_database_error_display() {
        let err = DatabaseError::AlreadyExists {
            kind: AssetKind::Quiz,
            target_id: 7,
        };
        assert!(err.to_string().contains("quiz"));
        assert!(err.to_string().contains('7'));

        let err = DatabaseError::ConnectionFailed("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_open_path_applies_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::open_path(&dir.path().join("folio.db"))
            .await
            .expect("open database");

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(db.pool())
                .await
                .expect("list tables");
        let names: Vec<String> = tables.into_iter().map(|(n,)| n).collect();
        assert!(names.contains(&"generation_records".to_string()));
        assert!(names.contains(&"chapters".to_string()));

        // Migrations are idempotent.
        db.run_migrations().await.expect("second run");
    }
}
