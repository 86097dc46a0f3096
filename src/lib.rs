// ABOUTME: Library crate for pg-rowsync
// ABOUTME: One-way PostgreSQL row reconciliation from an authoritative source to a target

//! Replicates missing rows from a source PostgreSQL database to a target,
//! table by table, creating target tables on demand from the source schema.
//!
//! The target may lag behind the source but must never lose or duplicate
//! data: rows are matched by primary key, inserts ignore conflicts, and each
//! table is synced inside its own target transaction so one table's failure
//! cannot disturb another's committed work.

pub mod config;
pub mod postgres;
pub mod sync;
