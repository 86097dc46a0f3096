// ABOUTME: The synchronization engine: schema inspection, row diffing, bulk insertion
// ABOUTME: Re-exports the per-table synchronizer and the run orchestrator

pub mod differ;
pub mod inspector;
pub mod runner;
pub mod writer;

pub use differ::{diff, TableDiff};
pub use runner::{sync_all, sync_table, SyncReport, TableOutcome, TableReport};
