// ABOUTME: Bulk conflict-safe insertion of missing rows into the target
// ABOUTME: Builds INSERT ... ON CONFLICT DO NOTHING statements within parameter limits

use anyhow::{Context, Result};
use bytes::BytesMut;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Row, Transaction};

/// Insert rows into a target table, silently dropping rows whose primary key
/// already exists there.
///
/// Runs inside the caller's transaction so a failure rolls the whole table
/// back. Statements are chunked to stay within PostgreSQL's ~65535 parameter
/// limit. Returns the number of rows actually inserted, which can be lower
/// than `rows.len()` when a concurrent writer landed a key since the diff
/// was computed.
pub async fn insert_missing(
    tx: &Transaction<'_>,
    schema: &str,
    table: &str,
    columns: &[(String, Type)],
    rows: &[Row],
) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let column_names: Vec<String> = columns.iter().map(|(name, _)| name.clone()).collect();

    // PostgreSQL has a limit of ~65535 parameters per query
    let max_params = 65000; // Leave some margin
    let batch_size = std::cmp::max(1, max_params / columns.len());

    let mut total_inserted = 0u64;

    for chunk in rows.chunks(batch_size) {
        let query = build_insert_query(schema, table, &column_names, chunk.len());

        let values: Vec<Vec<Box<dyn ToSql + Sync + Send>>> =
            chunk.iter().map(|row| row_to_values(row, columns)).collect();

        let params: Vec<&(dyn ToSql + Sync)> = values
            .iter()
            .flat_map(|row| row.iter().map(|v| v.as_ref() as &(dyn ToSql + Sync)))
            .collect();

        let inserted = tx
            .execute(&query, &params)
            .await
            .with_context(|| format!("Failed to insert batch into {}.{}", schema, table))?;
        total_inserted += inserted;
    }

    Ok(total_inserted)
}

/// Build a conflict-ignoring insert for the given column list and batch size.
///
/// Generates a query like:
/// ```sql
/// INSERT INTO "schema"."table" ("col1", "col2")
/// VALUES ($1, $2), ($3, $4), ...
/// ON CONFLICT DO NOTHING
/// ```
///
/// No conflict target is named, so any uniqueness constraint on the table
/// suppresses the duplicate instead of failing the batch.
pub fn build_insert_query(
    schema: &str,
    table: &str,
    columns: &[String],
    num_rows: usize,
) -> String {
    let quoted_columns: Vec<String> = columns.iter().map(|c| format!("\"{}\"", c)).collect();

    let num_cols = columns.len();
    let value_rows: Vec<String> = (0..num_rows)
        .map(|row_idx| {
            let placeholders: Vec<String> = (0..num_cols)
                .map(|col_idx| format!("${}", row_idx * num_cols + col_idx + 1))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO \"{}\".\"{}\" ({}) VALUES {} ON CONFLICT DO NOTHING",
        schema,
        table,
        quoted_columns.join(", "),
        value_rows.join(", ")
    )
}

/// Convert a scanned row to boxed ToSql values, one per insertable column.
///
/// The column types come from the scan's statement metadata, so extraction is
/// positional. Types outside the conversion table pass through as raw wire
/// bytes, untouched.
pub fn row_to_values(row: &Row, columns: &[(String, Type)]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, (_name, ty))| -> Box<dyn ToSql + Sync + Send> {
            match ty.name() {
                "int2" => Box::new(row.get::<_, Option<i16>>(idx)),
                "int4" => Box::new(row.get::<_, Option<i32>>(idx)),
                "int8" => Box::new(row.get::<_, Option<i64>>(idx)),
                "float4" => Box::new(row.get::<_, Option<f32>>(idx)),
                "float8" => Box::new(row.get::<_, Option<f64>>(idx)),
                "text" | "varchar" | "bpchar" | "name" => {
                    Box::new(row.get::<_, Option<String>>(idx))
                }
                "bool" => Box::new(row.get::<_, Option<bool>>(idx)),
                "uuid" => Box::new(row.get::<_, Option<uuid::Uuid>>(idx)),
                "timestamp" => Box::new(row.get::<_, Option<chrono::NaiveDateTime>>(idx)),
                "timestamptz" => {
                    Box::new(row.get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx))
                }
                "date" => Box::new(row.get::<_, Option<chrono::NaiveDate>>(idx)),
                "json" | "jsonb" => Box::new(row.get::<_, Option<serde_json::Value>>(idx)),
                "bytea" => Box::new(row.get::<_, Option<Vec<u8>>>(idx)),
                "numeric" => Box::new(row.get::<_, Option<rust_decimal::Decimal>>(idx)),
                _ => Box::new(row.get::<_, RawValue>(idx)),
            }
        })
        .collect()
}

/// Lossless passthrough for column types outside the conversion table.
///
/// Arrays, enums, ranges, `inet`, and extension types are carried as the
/// wire bytes read from the source and written back unmodified on insert.
/// The target column shares the source column's type, so the binary
/// representation is valid on both ends.
#[derive(Debug)]
struct RawValue(Option<Vec<u8>>);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(RawValue(Some(raw.to_vec())))
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(RawValue(None))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

impl ToSql for RawValue {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match &self.0 {
            Some(bytes) => {
                out.extend_from_slice(bytes);
                Ok(IsNull::No)
            }
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
