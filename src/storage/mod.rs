//! SQLite persistent storage.
//!
//! The storage system consists of:
//! - **Database**: pooled SQLite client (WAL journal) shared by every store
//! - **Schema**: table definitions for the catalog and generation records
//! - **Migrations**: idempotent schema application tracked in `_migrations`
//!
//! # Usage
//!
//! ```rust,ignore
//! use folio_forge::storage::Database;
//!
//! let db = Database::connect("sqlite://folio.db").await?;
//! db.run_migrations().await?;
//! ```

pub mod database;
pub mod migrations;
pub mod schema;

pub use database::{from_millis, now_millis, Database, DatabaseError};
pub use migrations::{AppliedMigration, MigrationError, MigrationRunner};
