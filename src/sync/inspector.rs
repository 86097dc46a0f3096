// ABOUTME: Schema inspection against the PostgreSQL catalogs
// ABOUTME: Table existence, column definitions, primary keys, and initial table creation

use anyhow::{Context, Result};
use tokio_postgres::Client;

/// Check whether a table exists.
///
/// Returns false, never an error, for a nonexistent table.
pub async fn table_exists(client: &Client, schema: &str, table: &str) -> Result<bool> {
    let row = client
        .query_one(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )",
            &[&schema, &table],
        )
        .await
        .with_context(|| format!("Failed to check existence of {}.{}", schema, table))?;

    Ok(row.get(0))
}

/// Get (column name, data type) pairs for a table in declaration order.
pub async fn get_schema(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<Vec<(String, String)>> {
    let rows = client
        .query(
            "SELECT column_name, data_type
             FROM information_schema.columns
             WHERE table_schema = $1 AND table_name = $2
             ORDER BY ordinal_position",
            &[&schema, &table],
        )
        .await
        .with_context(|| format!("Failed to get columns for {}.{}", schema, table))?;

    Ok(rows
        .iter()
        .map(|row| (row.get(0), row.get(1)))
        .collect())
}

/// Get primary key column names for a table, in key order.
///
/// An empty result means the table has no primary key. Callers must treat
/// that as a hard precondition failure for diffing, not as an empty diff.
pub async fn get_primary_keys(client: &Client, schema: &str, table: &str) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT a.attname
             FROM pg_index i
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
             JOIN pg_class c ON c.oid = i.indrelid
             JOIN pg_namespace n ON n.oid = c.relnamespace
             WHERE i.indisprimary
               AND n.nspname = $1
               AND c.relname = $2
             ORDER BY array_position(i.indkey, a.attnum)",
            &[&schema, &table],
        )
        .await
        .with_context(|| format!("Failed to get primary key for {}.{}", schema, table))?;

    Ok(rows.iter().map(|row| row.get(0)).collect())
}

/// List all user tables in a schema, in deterministic name order.
pub async fn list_tables(client: &Client, schema: &str) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT table_name FROM information_schema.tables
             WHERE table_schema = $1 AND table_type = 'BASE TABLE'
             ORDER BY table_name",
            &[&schema],
        )
        .await
        .with_context(|| format!("Failed to list tables in schema {}", schema))?;

    Ok(rows.iter().map(|row| row.get(0)).collect())
}

/// Ensure a table exists on target, creating it from the source schema if not.
///
/// The CREATE statement carries the source-reported column types verbatim:
/// both ends are PostgreSQL, so no type translation happens. An existing
/// target table is left untouched regardless of how its columns compare to
/// source; drift beyond initial creation is out of scope.
pub async fn ensure_table(
    source: &Client,
    target: &Client,
    schema: &str,
    table: &str,
) -> Result<()> {
    if table_exists(target, schema, table).await? {
        tracing::info!("{}.{} already exists in target database", schema, table);
        return Ok(());
    }

    let columns = get_schema(source, schema, table).await?;
    if columns.is_empty() {
        anyhow::bail!("Source reports no columns for {}.{}", schema, table);
    }

    let create = build_create_table(schema, table, &columns);
    target
        .execute(&create, &[])
        .await
        .with_context(|| format!("Failed to create {}.{} in target", schema, table))?;

    tracing::info!("Copied schema for {}.{} to target database", schema, table);
    Ok(())
}

/// Build a CREATE TABLE statement from (name, data type) pairs.
fn build_create_table(schema: &str, table: &str, columns: &[(String, String)]) -> String {
    let column_defs: Vec<String> = columns
        .iter()
        .map(|(name, dtype)| format!("\"{}\" {}", name, dtype))
        .collect();

    format!(
        "CREATE TABLE \"{}\".\"{}\" ({})",
        schema,
        table,
        column_defs.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_create_table() {
        let columns = vec![
            ("id".to_string(), "integer".to_string()),
            ("name".to_string(), "text".to_string()),
        ];
        let sql = build_create_table("public", "users", &columns);
        assert_eq!(
            sql,
            "CREATE TABLE \"public\".\"users\" (\"id\" integer, \"name\" text)"
        );
    }

    #[test]
    fn test_build_create_table_quotes_reserved_words() {
        let columns = vec![("order".to_string(), "bigint".to_string())];
        let sql = build_create_table("public", "select", &columns);
        assert!(sql.contains("\"public\".\"select\""));
        assert!(sql.contains("\"order\" bigint"));
    }

    #[test]
    fn test_build_create_table_multi_word_types() {
        let columns = vec![
            ("created_at".to_string(), "timestamp with time zone".to_string()),
            ("label".to_string(), "character varying".to_string()),
        ];
        let sql = build_create_table("public", "events", &columns);
        assert!(sql.contains("\"created_at\" timestamp with time zone"));
        assert!(sql.contains("\"label\" character varying"));
    }
}
