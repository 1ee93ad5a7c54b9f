//! Command-line interface for folio-forge.
//!
//! Provides commands for importing books, opening chapters, requesting and
//! inspecting assets, and running the pipelines.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
