//! Generation record store.
//!
//! One `RecordStore` per asset kind, all sharing the `generation_records`
//! table. Every method runs on its own pool connection in autocommit mode, so
//! a write returns only after it is visible to every other connection. None
//! of them accept a caller transaction.
//!
//! Races are settled by the table, not by locks: `create` relies on the
//! `(kind, target_id)` primary key, and the sweep helpers are conditional
//! updates that report whether they matched.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use super::kind::AssetKind;
use super::record::{GenerationRecord, GenerationStatus, StatusCounts};
use crate::storage::{from_millis, now_millis, Database, DatabaseError};

const RECORD_COLUMNS: &str = "kind, target_id, book_id, status, output_ref, error_message, \
     created_at, updated_at, completed_at";

/// Durable store of generation records for a single asset kind.
#[derive(Clone)]
pub struct RecordStore {
    db: Database,
    kind: AssetKind,
}

impl RecordStore {
    pub fn new(db: Database, kind: AssetKind) -> Self {
        Self { db, kind }
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Reads the record for a target, if any.
    pub async fn get(&self, target_id: i64) -> Result<Option<GenerationRecord>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM generation_records WHERE kind = ?1 AND target_id = ?2",
            RECORD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(self.kind.as_str())
            .bind(target_id)
            .fetch_optional(self.db.pool())
            .await?;

        row.map(|r| self.map_row(&r)).transpose()
    }

    /// Inserts a new `Pending` record.
    ///
    /// There is no read-before-write: a concurrent creator makes this fail
    /// with [`DatabaseError::AlreadyExists`].
    pub async fn create(
        &self,
        target_id: i64,
        book_id: i64,
    ) -> Result<GenerationRecord, DatabaseError> {
        let now = now_millis();
        let result = sqlx::query(
            "INSERT INTO generation_records
                (kind, target_id, book_id, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        )
        .bind(self.kind.as_str())
        .bind(target_id)
        .bind(book_id)
        .bind(GenerationStatus::Pending.as_str())
        .bind(now)
        .execute(self.db.pool())
        .await;

        match result {
            Ok(_) => {
                debug!(kind = %self.kind, target_id = target_id, "Created generation record");
                let ts = from_millis(now)?;
                Ok(GenerationRecord {
                    kind: self.kind,
                    target_id,
                    book_id,
                    status: Some(GenerationStatus::Pending),
                    output_ref: None,
                    error_message: None,
                    created_at: ts,
                    updated_at: ts,
                    completed_at: None,
                })
            }
            Err(e) if DatabaseError::is_unique_violation(&e) => Err(DatabaseError::AlreadyExists {
                kind: self.kind,
                target_id,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes a status and bumps `updated_at`.
    ///
    /// `output_ref` is kept only for `Completed` and `error` only for
    /// `Failed`; every other status clears them. Returns `false` when the
    /// record no longer exists.
    pub async fn update_status(
        &self,
        target_id: i64,
        status: GenerationStatus,
        output_ref: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let now = now_millis();
        let output_ref = match status {
            GenerationStatus::Completed => output_ref,
            _ => None,
        };
        let error = match status {
            GenerationStatus::Failed => Some(error.unwrap_or("generation failed")),
            _ => None,
        };
        let completed_at = match status {
            GenerationStatus::Completed => Some(now),
            _ => None,
        };

        let result = sqlx::query(
            "UPDATE generation_records
             SET status = ?3, output_ref = ?4, error_message = ?5,
                 updated_at = ?6, completed_at = ?7
             WHERE kind = ?1 AND target_id = ?2",
        )
        .bind(self.kind.as_str())
        .bind(target_id)
        .bind(status.as_str())
        .bind(output_ref)
        .bind(error)
        .bind(now)
        .bind(completed_at)
        .execute(self.db.pool())
        .await?;

        let updated = result.rows_affected() > 0;
        if !updated {
            debug!(
                kind = %self.kind,
                target_id = target_id,
                status = %status,
                "Status update skipped, record is gone"
            );
        }
        Ok(updated)
    }

    /// Resets a record to `Pending`, clearing output and error, only while it
    /// is still in `expected` (`None` matches a legacy NULL status).
    ///
    /// Returns `false` when another writer moved the record first.
    pub async fn reset_to_pending_if(
        &self,
        target_id: i64,
        expected: Option<GenerationStatus>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE generation_records
             SET status = ?3, output_ref = NULL, error_message = NULL,
                 completed_at = NULL, updated_at = ?4
             WHERE kind = ?1 AND target_id = ?2 AND status IS ?5",
        )
        .bind(self.kind.as_str())
        .bind(target_id)
        .bind(GenerationStatus::Pending.as_str())
        .bind(now_millis())
        .bind(expected.map(|s| s.as_str()))
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Moves a record to `Generating` unless it is already `Completed`.
    ///
    /// Returns `false` for a completed or missing record.
    pub async fn mark_generating(&self, target_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE generation_records
             SET status = ?3, output_ref = NULL, error_message = NULL,
                 completed_at = NULL, updated_at = ?4
             WHERE kind = ?1 AND target_id = ?2 AND status IS NOT ?5",
        )
        .bind(self.kind.as_str())
        .bind(target_id)
        .bind(GenerationStatus::Generating.as_str())
        .bind(now_millis())
        .bind(GenerationStatus::Completed.as_str())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Resets a `Generating` record to `Pending` if it has not been touched
    /// since `older_than`.
    ///
    /// The guard on both status and `updated_at` means a record the worker
    /// wrote after the sweep listed it is left alone.
    pub async fn reset_if_stale(
        &self,
        target_id: i64,
        older_than: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE generation_records
             SET status = ?3, output_ref = NULL, error_message = NULL,
                 completed_at = NULL, updated_at = ?4
             WHERE kind = ?1 AND target_id = ?2 AND status = ?5 AND updated_at < ?6",
        )
        .bind(self.kind.as_str())
        .bind(target_id)
        .bind(GenerationStatus::Pending.as_str())
        .bind(now_millis())
        .bind(GenerationStatus::Generating.as_str())
        .bind(older_than.timestamp_millis())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Turns a NULL-status row into `Pending`. Returns `false` if the row
    /// already had a status or is gone.
    pub async fn normalize_legacy(&self, target_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE generation_records
             SET status = ?3, updated_at = ?4
             WHERE kind = ?1 AND target_id = ?2 AND status IS NULL",
        )
        .bind(self.kind.as_str())
        .bind(target_id)
        .bind(GenerationStatus::Pending.as_str())
        .bind(now_millis())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists records in a status, oldest update first.
    pub async fn list_by_status(
        &self,
        status: GenerationStatus,
        book_id: Option<i64>,
    ) -> Result<Vec<GenerationRecord>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM generation_records
             WHERE kind = ?1 AND status = ?2 AND (?3 IS NULL OR book_id = ?3)
             ORDER BY updated_at, target_id",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(self.kind.as_str())
            .bind(status.as_str())
            .bind(book_id)
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(|r| self.map_row(r)).collect()
    }

    /// Lists rows written before status tracking (NULL status).
    pub async fn list_legacy(
        &self,
        book_id: Option<i64>,
    ) -> Result<Vec<GenerationRecord>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM generation_records
             WHERE kind = ?1 AND status IS NULL AND (?2 IS NULL OR book_id = ?2)
             ORDER BY updated_at, target_id",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(self.kind.as_str())
            .bind(book_id)
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(|r| self.map_row(r)).collect()
    }

    /// Lists records in `status` whose `updated_at` is strictly before
    /// `older_than`.
    pub async fn list_stale_in_status(
        &self,
        status: GenerationStatus,
        older_than: DateTime<Utc>,
        book_id: Option<i64>,
    ) -> Result<Vec<GenerationRecord>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM generation_records
             WHERE kind = ?1 AND status = ?2 AND updated_at < ?3
               AND (?4 IS NULL OR book_id = ?4)
             ORDER BY updated_at, target_id",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(self.kind.as_str())
            .bind(status.as_str())
            .bind(older_than.timestamp_millis())
            .bind(book_id)
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(|r| self.map_row(r)).collect()
    }

    /// Counts records per status.
    pub async fn counts(&self, book_id: Option<i64>) -> Result<StatusCounts, DatabaseError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM generation_records
             WHERE kind = ?1 AND (?2 IS NULL OR book_id = ?2)
             GROUP BY status",
        )
        .bind(self.kind.as_str())
        .bind(book_id)
        .fetch_all(self.db.pool())
        .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: Option<String> = row.get("status");
            let n: i64 = row.get("n");
            counts.add(parse_status(status)?, n as u64);
        }
        Ok(counts)
    }

    /// Deletes the record for a target. Returns `false` if there was none.
    pub async fn delete(&self, target_id: i64) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("DELETE FROM generation_records WHERE kind = ?1 AND target_id = ?2")
                .bind(self.kind.as_str())
                .bind(target_id)
                .execute(self.db.pool())
                .await?;

        Ok(result.rows_affected() > 0)
    }

    fn map_row(&self, row: &SqliteRow) -> Result<GenerationRecord, DatabaseError> {
        let kind_str: String = row.get("kind");
        let kind: AssetKind = kind_str.parse().map_err(DatabaseError::CorruptRow)?;
        if kind != self.kind {
            return Err(DatabaseError::CorruptRow(format!(
                "expected {} row, found {}",
                self.kind, kind
            )));
        }

        Ok(GenerationRecord {
            kind,
            target_id: row.get("target_id"),
            book_id: row.get("book_id"),
            status: parse_status(row.get("status"))?,
            output_ref: row.get("output_ref"),
            error_message: row.get("error_message"),
            created_at: from_millis(row.get("created_at"))?,
            updated_at: from_millis(row.get("updated_at"))?,
            completed_at: row
                .get::<Option<i64>, _>("completed_at")
                .map(from_millis)
                .transpose()?,
        })
    }
}

fn parse_status(raw: Option<String>) -> Result<Option<GenerationStatus>, DatabaseError> {
    raw.map(|s| s.parse().map_err(DatabaseError::CorruptRow))
        .transpose()
}
