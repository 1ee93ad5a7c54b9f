//! Durable generation record types.
//!
//! This module defines the rows the pipeline persists:
//!
//! - `GenerationStatus`: lifecycle state of one asset
//! - `GenerationRecord`: one row per (kind, target id)
//! - `StatusView`: read-only projection handed to callers
//! - `StatusCounts`: per-status tallies used by batch waits and the CLI

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::kind::AssetKind;

/// Lifecycle state of a generation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    /// Requested and waiting for the worker.
    Pending,
    /// Picked up by the worker; staleness is measured from here.
    Generating,
    /// Output is available in `output_ref`.
    Completed,
    /// Generation failed; `error_message` says why.
    Failed,
}

impl GenerationStatus {
    pub const ALL: [GenerationStatus; 4] = [
        GenerationStatus::Pending,
        GenerationStatus::Generating,
        GenerationStatus::Completed,
        GenerationStatus::Failed,
    ];

    /// Value stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Generating => "generating",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        }
    }

    /// Returns true for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(GenerationStatus::Pending),
            "generating" => Ok(GenerationStatus::Generating),
            "completed" => Ok(GenerationStatus::Completed),
            "failed" => Ok(GenerationStatus::Failed),
            other => Err(format!("unknown generation status '{}'", other)),
        }
    }
}

/// One durable row per (kind, target id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub kind: AssetKind,
    /// Chapter id or character id, depending on `kind`.
    pub target_id: i64,
    /// Owning book of the target.
    pub book_id: i64,
    /// `None` on rows written before status tracking existed.
    pub status: Option<GenerationStatus>,
    /// File name or JSON payload; only set when completed.
    pub output_ref: Option<String>,
    /// Only set when failed.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationRecord {
    /// Status with legacy rows read as pending.
    pub fn effective_status(&self) -> GenerationStatus {
        self.status.unwrap_or(GenerationStatus::Pending)
    }

    /// Returns true if the row predates status tracking.
    pub fn is_legacy(&self) -> bool {
        self.status.is_none()
    }

    pub fn is_ready(&self) -> bool {
        self.status == Some(GenerationStatus::Completed)
    }

    /// Projects the record into the caller-facing view.
    pub fn view(&self) -> StatusView {
        StatusView {
            status: self.effective_status(),
            ready: self.is_ready(),
            generated_at: self.completed_at,
            updated_at: self.updated_at,
            output_ref: self.output_ref.clone(),
            error: self.error_message.clone(),
        }
    }
}

/// Read-only status exposed to callers. `ready` is true iff completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub status: GenerationStatus,
    pub ready: bool,
    pub generated_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Number of records in each status for one kind, optionally scoped to a book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub generating: u64,
    pub completed: u64,
    pub failed: u64,
    /// Rows with a NULL status.
    pub legacy: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.generating + self.completed + self.failed + self.legacy
    }

    /// Records that reached `Completed` or `Failed`.
    pub fn terminal(&self) -> u64 {
        self.completed + self.failed
    }

    /// Returns true when every record is terminal.
    pub fn is_settled(&self) -> bool {
        self.terminal() == self.total()
    }

    pub(crate) fn add(&mut self, status: Option<GenerationStatus>, count: u64) {
        match status {
            Some(GenerationStatus::Pending) => self.pending += count,
            Some(GenerationStatus::Generating) => self.generating += count,
            Some(GenerationStatus::Completed) => self.completed += count,
            Some(GenerationStatus::Failed) => self.failed += count,
            None => self.legacy += count,
        }
    }

    /// Sums two tallies.
    pub fn merge(&self, other: &StatusCounts) -> StatusCounts {
        StatusCounts {
            pending: self.pending + other.pending,
            generating: self.generating + other.generating,
            completed: self.completed + other.completed,
            failed: self.failed + other.failed,
            legacy: self.legacy + other.legacy,
        }
    }
}
