//! Commit-deferred enqueues.
//!
//! The request gate writes records on its own connections but must not wake
//! a worker before the caller's transaction commits. It registers the wake-up
//! in an [`Outbox`] instead; the caller flushes it after a successful commit.
//! [`UnitOfWork`] bundles a transaction with its outbox so that ordering is
//! the only one available.

use std::sync::Arc;

use sqlx::{Sqlite, SqliteConnection, Transaction};

use super::queue::DedupQueue;
use crate::storage::{Database, DatabaseError};

/// Enqueues waiting for a commit.
#[derive(Default)]
pub struct Outbox {
    pending: Vec<(Arc<DedupQueue>, i64)>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `target_id` to be enqueued on `queue` at flush time.
    pub fn defer(&mut self, queue: Arc<DedupQueue>, target_id: i64) {
        self.pending.push((queue, target_id));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Runs every deferred enqueue in registration order.
    ///
    /// Returns how many ids were newly queued; ids already waiting count as
    /// zero.
    pub async fn flush(self) -> usize {
        let mut queued = 0;
        for (queue, target_id) in self.pending {
            if queue.enqueue(target_id).await {
                queued += 1;
            }
        }
        queued
    }

    /// Drops every deferred enqueue. Records already written as pending are
    /// picked up by the next recovery sweep.
    pub fn discard(self) {
        if !self.pending.is_empty() {
            tracing::debug!(discarded = self.pending.len(), "Discarded deferred enqueues");
        }
    }
}

/// A caller transaction plus the enqueues that must follow its commit.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
    outbox: Outbox,
}

impl UnitOfWork {
    pub async fn begin(db: &Database) -> Result<Self, DatabaseError> {
        Ok(Self {
            tx: db.begin().await?,
            outbox: Outbox::new(),
        })
    }

    /// Connection bound to the transaction, for the caller's own writes.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub fn outbox(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    /// Commits, then flushes the outbox. Returns the number of ids queued.
    ///
    /// If the commit fails nothing is enqueued.
    pub async fn commit(self) -> Result<usize, DatabaseError> {
        let Self { tx, outbox } = self;
        if let Err(e) = tx.commit().await {
            outbox.discard();
            return Err(e.into());
        }
        Ok(outbox.flush().await)
    }

    /// Rolls back and discards the outbox.
    pub async fn rollback(self) -> Result<(), DatabaseError> {
        let Self { tx, outbox } = self;
        outbox.discard();
        tx.rollback().await?;
        Ok(())
    }
}
