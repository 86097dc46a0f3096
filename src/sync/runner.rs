// ABOUTME: Table synchronizer and run orchestrator
// ABOUTME: Drives inspect, diff, and insert per table with per-table transaction isolation

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tokio_postgres::Client;

use super::{differ, inspector, writer};
use crate::postgres::SyncSession;

/// How one table's sync ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableOutcome {
    /// Missing rows were inserted and committed.
    Synced { rows_inserted: u64 },
    /// No rows were missing; nothing to do.
    InSync,
    /// The table has no primary key and cannot be diffed. The target table
    /// is still created, but never populated by this engine.
    NoPrimaryKey,
    /// An integrity violation during insert or commit rolled this table
    /// back. The run continues; the table is left not fully synced.
    IntegrityRollback,
}

/// Per-table entry in the run report.
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: String,
    pub outcome: TableOutcome,
}

/// Summary of one full sync pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub tables: Vec<TableReport>,
    pub duration_ms: u64,
}

impl SyncReport {
    /// Total rows inserted across all tables.
    pub fn rows_inserted(&self) -> u64 {
        self.tables
            .iter()
            .map(|t| match t.outcome {
                TableOutcome::Synced { rows_inserted } => rows_inserted,
                _ => 0,
            })
            .sum()
    }

    /// True when every table ended in sync with the source.
    pub fn is_fully_synced(&self) -> bool {
        self.tables.iter().all(|t| {
            matches!(
                t.outcome,
                TableOutcome::Synced { .. } | TableOutcome::InSync
            )
        })
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create report file {}", path.display()))?;
        serde_json::to_writer_pretty(file, self).context("Failed to write report")?;
        Ok(())
    }
}

/// Sync one table: ensure it exists on target, diff, and bulk-insert the
/// missing rows inside a single target transaction.
///
/// Failure isolation is per table. A missing primary key or an integrity
/// violation is contained (logged, rolled back where applicable, reported in
/// the outcome); any other failure rolls back this table's transaction and
/// propagates, aborting the remaining run.
pub async fn sync_table(
    source: &Client,
    target: &mut Client,
    schema: &str,
    table: &str,
) -> Result<TableOutcome> {
    inspector::ensure_table(source, target, schema, table).await?;

    // Schema copy above happens regardless; diffability is checked after.
    let pk_columns = inspector::get_primary_keys(source, schema, table).await?;
    if pk_columns.is_empty() {
        tracing::error!("No primary key found for {}.{}, skipping", schema, table);
        return Ok(TableOutcome::NoPrimaryKey);
    }

    let diff = differ::diff(source, target, schema, table, &pk_columns).await?;
    if diff.is_empty() {
        tracing::info!("No missing rows to sync for {}.{}", schema, table);
        return Ok(TableOutcome::InSync);
    }

    let tx = target
        .transaction()
        .await
        .with_context(|| format!("Failed to begin transaction for {}.{}", schema, table))?;

    let inserted = match writer::insert_missing(&tx, schema, table, &diff.columns, &diff.missing).await
    {
        Ok(inserted) => inserted,
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                tracing::warn!("Rollback of {}.{} failed: {}", schema, table, rb);
            }
            if is_integrity_violation(&e) {
                tracing::warn!("Integrity error syncing {}.{}: {}", schema, table, e);
                return Ok(TableOutcome::IntegrityRollback);
            }
            tracing::error!("Unexpected error syncing {}.{}: {:?}", schema, table, e);
            return Err(e);
        }
    };

    // Deferred constraints fire at COMMIT, so the commit itself can raise an
    // integrity violation and gets the same containment as the insert. A
    // failed commit has already aborted the transaction server-side.
    if let Err(e) = tx.commit().await {
        let e = anyhow::Error::new(e)
            .context(format!("Failed to commit sync of {}.{}", schema, table));
        if is_integrity_violation(&e) {
            tracing::warn!("Integrity error committing {}.{}: {}", schema, table, e);
            return Ok(TableOutcome::IntegrityRollback);
        }
        tracing::error!("Unexpected error committing {}.{}: {:?}", schema, table, e);
        return Err(e);
    }

    tracing::info!(
        "Synced {}.{} successfully with {} rows",
        schema,
        table,
        inserted
    );
    Ok(TableOutcome::Synced {
        rows_inserted: inserted,
    })
}

/// Sync every user table of the source schema, sequentially.
///
/// Tables are independent sync units: work committed for an earlier table
/// stays committed even when a later table aborts the run. Foreign-key
/// ordering is not resolved; rows whose references are not yet present are
/// contained by the per-table integrity handling.
pub async fn sync_all(session: &mut SyncSession, schema: &str) -> Result<SyncReport> {
    let start = std::time::Instant::now();

    let source = session.source.client();
    let target = session.target.client_mut();

    let tables = inspector::list_tables(source, schema)
        .await
        .context("Failed to enumerate source tables")?;
    tracing::info!("Found {} tables to sync in schema {}", tables.len(), schema);

    let mut report = SyncReport::default();
    for table in &tables {
        let outcome = sync_table(source, target, schema, table)
            .await
            .with_context(|| format!("Failed to sync {}.{}", schema, table))?;
        report.tables.push(TableReport {
            table: table.clone(),
            outcome,
        });
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    tracing::info!(
        "All tables synced: {} rows inserted across {} tables in {}ms",
        report.rows_inserted(),
        report.tables.len(),
        report.duration_ms
    );
    Ok(report)
}

/// Whether an error is a PostgreSQL integrity-constraint violation.
///
/// SQLSTATE class 23 covers unique, foreign-key, not-null, and check
/// violations. These are contained per table rather than failing the run.
fn is_integrity_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<tokio_postgres::Error>()
        .and_then(|e| e.code())
        .is_some_and(|code| is_integrity_code(code.code()))
}

/// SQLSTATE class 23 is "integrity constraint violation".
fn is_integrity_code(code: &str) -> bool {
    code.starts_with("23")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with(outcomes: Vec<(&str, TableOutcome)>) -> SyncReport {
        SyncReport {
            tables: outcomes
                .into_iter()
                .map(|(table, outcome)| TableReport {
                    table: table.to_string(),
                    outcome,
                })
                .collect(),
            duration_ms: 42,
        }
    }

    #[test]
    fn test_report_rows_inserted() {
        let report = report_with(vec![
            ("users", TableOutcome::Synced { rows_inserted: 10 }),
            ("orders", TableOutcome::Synced { rows_inserted: 5 }),
            ("tags", TableOutcome::InSync),
        ]);
        assert_eq!(report.rows_inserted(), 15);
    }

    #[test]
    fn test_report_fully_synced() {
        let report = report_with(vec![
            ("users", TableOutcome::Synced { rows_inserted: 1 }),
            ("tags", TableOutcome::InSync),
        ]);
        assert!(report.is_fully_synced());
    }

    #[test]
    fn test_report_not_fully_synced() {
        let report = report_with(vec![
            ("users", TableOutcome::Synced { rows_inserted: 1 }),
            ("legacy", TableOutcome::NoPrimaryKey),
        ]);
        assert!(!report.is_fully_synced());

        let report = report_with(vec![("orders", TableOutcome::IntegrityRollback)]);
        assert!(!report.is_fully_synced());
    }

    #[test]
    fn test_integrity_codes_are_class_23() {
        assert!(is_integrity_code("23505")); // unique_violation
        assert!(is_integrity_code("23503")); // foreign_key_violation, deferred to COMMIT when the constraint is deferrable
        assert!(is_integrity_code("23000"));
        assert!(!is_integrity_code("40001")); // serialization_failure
        assert!(!is_integrity_code("0A000"));
        assert!(!is_integrity_code("42P01"));
    }

    #[test]
    fn test_non_database_errors_are_not_integrity_violations() {
        let err = anyhow::anyhow!("connection reset by peer");
        assert!(!is_integrity_violation(&err));

        let err = err.context("Failed to commit sync of public.users");
        assert!(!is_integrity_violation(&err));
    }

    #[test]
    fn test_report_serializes_outcome_tags() {
        let report = report_with(vec![
            ("users", TableOutcome::Synced { rows_inserted: 3 }),
            ("legacy", TableOutcome::NoPrimaryKey),
        ]);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"status\":\"synced\""));
        assert!(json.contains("\"rows_inserted\":3"));
        assert!(json.contains("\"status\":\"no_primary_key\""));
    }
}
