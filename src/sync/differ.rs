// ABOUTME: Row differ - finds source rows absent from target by primary key
// ABOUTME: Single anti-join pass: one source scan plus one target key fetch

use anyhow::{Context, Result};
use std::collections::HashSet;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, Row};

/// The result of diffing one table.
///
/// Rows are positional, so the missing rows always travel with the column
/// list and types captured from the same source scan. Column order is
/// whatever the source engine returned, not necessarily declaration order.
pub struct TableDiff {
    /// Source rows absent from target, in source scan order.
    pub missing: Vec<Row>,
    /// Insertable columns of the scan, aligned with each row's values.
    pub columns: Vec<(String, Type)>,
}

impl TableDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Compute the rows present in source but absent from target.
///
/// `pk_columns` must be non-empty; the caller checks that precondition and
/// reports tables without a primary key instead of calling diff.
///
/// The source scan appends a `::text` projection of each primary-key column
/// to `SELECT *`, and the target's full primary-key set is fetched once in
/// the same text form. Membership is then decided in memory, which costs one
/// round trip to target for the whole table instead of one probe per source
/// row, with identical result content and order.
pub async fn diff(
    source: &Client,
    target: &Client,
    schema: &str,
    table: &str,
    pk_columns: &[String],
) -> Result<TableDiff> {
    let scan = build_scan_query(schema, table, pk_columns);
    let stmt = source
        .prepare(&scan)
        .await
        .with_context(|| format!("Failed to prepare scan of {}.{}", schema, table))?;

    // The trailing pk_columns.len() columns are the text-cast key projections;
    // everything before them is the insertable column list.
    let columns: Vec<(String, Type)> = stmt.columns()[..stmt.columns().len() - pk_columns.len()]
        .iter()
        .map(|c| (c.name().to_string(), c.type_().clone()))
        .collect();

    let source_rows = source
        .query(&stmt, &[])
        .await
        .with_context(|| format!("Failed to scan {}.{}", schema, table))?;

    let target_keys = fetch_target_keys(target, schema, table, pk_columns).await?;

    let key_start = columns.len();
    let missing: Vec<Row> = source_rows
        .into_iter()
        .filter(|row| !target_keys.contains(&key_of(row, key_start, pk_columns.len())))
        .collect();

    tracing::debug!(
        "{}.{}: {} rows missing from target",
        schema,
        table,
        missing.len()
    );

    Ok(TableDiff { missing, columns })
}

/// Build the source scan: `SELECT *` plus text casts of the key columns.
fn build_scan_query(schema: &str, table: &str, pk_columns: &[String]) -> String {
    let key_projections: Vec<String> = pk_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("\"{}\"::text AS _pk{}", c, i))
        .collect();

    format!(
        "SELECT *, {} FROM \"{}\".\"{}\"",
        key_projections.join(", "),
        schema,
        table
    )
}

/// Fetch every primary-key tuple currently present in the target table.
async fn fetch_target_keys(
    target: &Client,
    schema: &str,
    table: &str,
    pk_columns: &[String],
) -> Result<HashSet<Vec<String>>> {
    let key_list: Vec<String> = pk_columns
        .iter()
        .map(|c| format!("\"{}\"::text", c))
        .collect();

    let query = format!(
        "SELECT {} FROM \"{}\".\"{}\"",
        key_list.join(", "),
        schema,
        table
    );

    let rows = target
        .query(&query, &[])
        .await
        .with_context(|| format!("Failed to fetch primary keys from target {}.{}", schema, table))?;

    Ok(rows
        .iter()
        .map(|row| (0..pk_columns.len()).map(|i| row.get(i)).collect())
        .collect())
}

/// Extract the text-cast key tuple from a scanned source row.
fn key_of(row: &Row, key_start: usize, key_len: usize) -> Vec<String> {
    (key_start..key_start + key_len).map(|i| row.get(i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_scan_query_single_key() {
        let query = build_scan_query("public", "users", &["id".to_string()]);
        assert_eq!(
            query,
            "SELECT *, \"id\"::text AS _pk0 FROM \"public\".\"users\""
        );
    }

    #[test]
    fn test_build_scan_query_composite_key() {
        let query = build_scan_query(
            "public",
            "order_items",
            &["order_id".to_string(), "item_id".to_string()],
        );
        assert!(query.starts_with(
            "SELECT *, \"order_id\"::text AS _pk0, \"item_id\"::text AS _pk1"
        ));
        assert!(query.ends_with("FROM \"public\".\"order_items\""));
    }

    #[test]
    fn test_membership_is_by_full_tuple() {
        let mut target_keys: HashSet<Vec<String>> = HashSet::new();
        target_keys.insert(vec!["1".to_string(), "a".to_string()]);

        assert!(target_keys.contains(&vec!["1".to_string(), "a".to_string()]));
        // Same first component, different second: a distinct key.
        assert!(!target_keys.contains(&vec!["1".to_string(), "b".to_string()]));
    }
}
