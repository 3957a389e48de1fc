// src/worker/engine.rs
// Thin wrapper around the embedded analytical SQL engine: registers
// downloaded files as named views and converts engine-native values to
// JSON for the wire / storage layers. Runs entirely on a blocking thread;
// callers are responsible for the `spawn_blocking` + timeout wrapping.

use std::path::Path;

use duckdb::types::ValueRef;
use duckdb::Connection;
use serde_json::Value as Json;

use crate::domain::{ColumnSchema, ColumnStats};

use super::error::WorkerError;

pub struct DatasetRef<'a> {
    pub path: &'a Path,
    pub table_name: &'a str,
}

fn reader_expr(path: &Path) -> String {
    let lower = path.to_string_lossy().to_ascii_lowercase();
    let escaped = path.to_string_lossy().replace('\'', "''");
    if lower.ends_with(".parquet") {
        format!("read_parquet('{}')", escaped)
    } else if lower.ends_with(".json") {
        format!("read_json_auto('{}')", escaped)
    } else {
        format!("read_csv_auto('{}')", escaped)
    }
}

pub fn register_dataset(conn: &Connection, dataset: &DatasetRef) -> Result<(), WorkerError> {
    let sql = format!(
        "CREATE OR REPLACE VIEW \"{}\" AS SELECT * FROM {}",
        dataset.table_name,
        reader_expr(dataset.path)
    );
    conn.execute_batch(&sql)
        .map_err(|e| WorkerError::internal(format!("failed to register dataset: {}", e)))
}

pub fn value_ref_to_json(v: ValueRef) -> Json {
    match v {
        ValueRef::Null => Json::Null,
        ValueRef::Boolean(b) => Json::Bool(b),
        ValueRef::TinyInt(n) => Json::from(n),
        ValueRef::SmallInt(n) => Json::from(n),
        ValueRef::Int(n) => Json::from(n),
        ValueRef::BigInt(n) => Json::from(n),
        ValueRef::HugeInt(n) => Json::from(n.to_string()),
        ValueRef::UTinyInt(n) => Json::from(n),
        ValueRef::USmallInt(n) => Json::from(n),
        ValueRef::UInt(n) => Json::from(n),
        ValueRef::UBigInt(n) => Json::from(n),
        ValueRef::Float(f) => serde_json::Number::from_f64(f as f64)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        ValueRef::Double(f) => serde_json::Number::from_f64(f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        ValueRef::Decimal(d) => Json::String(d.to_string()),
        ValueRef::Text(bytes) => Json::String(String::from_utf8_lossy(bytes).to_string()),
        ValueRef::Blob(bytes) => Json::String(hex::encode(bytes)),
        ValueRef::Timestamp(_, n) => Json::from(n),
        ValueRef::Date32(n) => Json::from(n),
        ValueRef::Time64(_, n) => Json::from(n),
        other => Json::String(format!("{:?}", other)),
    }
}

/// Runs a read-only query and returns column names plus row values as JSON.
/// The caller has already validated the statement and appended a row cap.
pub fn run_select(conn: &Connection, sql: &str) -> Result<(Vec<String>, Vec<Vec<Json>>), WorkerError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| WorkerError::sql(e.to_string()))?;

    let column_count = stmt.column_count();
    let column_names: Vec<String> = (0..column_count)
        .map(|i| stmt.column_name(i).unwrap_or("?").to_string())
        .collect();

    let mut rows_out = Vec::new();
    let mut rows = stmt.query([]).map_err(|e| WorkerError::sql(e.to_string()))?;
    while let Some(row) = rows.next().map_err(|e| WorkerError::sql(e.to_string()))? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let value_ref = row
                .get_ref(i)
                .map_err(|e| WorkerError::internal(format!("failed to read column {}: {}", i, e)))?;
            values.push(value_ref_to_json(value_ref));
        }
        rows_out.push(values);
    }

    Ok((column_names, rows_out))
}

/// Best-effort column list across the given registered tables, used to
/// enrich "column not found" error messages. Never fails the caller: a
/// probing error for one table just contributes nothing for that table.
pub fn available_columns(conn: &Connection, table_names: &[&str]) -> Vec<String> {
    let mut columns = Vec::new();
    for table in table_names {
        let sql = format!("DESCRIBE SELECT * FROM \"{}\"", table);
        let Ok(mut stmt) = conn.prepare(&sql) else { continue };
        let Ok(mut rows) = stmt.query([]) else { continue };
        while let Ok(Some(row)) = rows.next() {
            let name: Result<String, _> = row.get(0);
            if let Ok(name) = name {
                columns.push(name);
            }
        }
    }
    columns
}

/// Derives a deterministic, serializable schema for a registered dataset:
/// per-column engine type plus a small statistics bundle.
pub fn describe_dataset(conn: &Connection, table_name: &str) -> Result<(Vec<ColumnSchema>, u64), WorkerError> {
    let describe_sql = format!("DESCRIBE SELECT * FROM \"{}\"", table_name);
    let mut stmt = conn
        .prepare(&describe_sql)
        .map_err(|e| WorkerError::internal(format!("failed to describe dataset: {}", e)))?;
    let mut rows = stmt
        .query([])
        .map_err(|e| WorkerError::internal(format!("failed to describe dataset: {}", e)))?;

    let mut columns = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| WorkerError::internal(format!("failed to describe dataset: {}", e)))?
    {
        let name: String = row
            .get(0)
            .map_err(|e| WorkerError::internal(format!("failed to read column name: {}", e)))?;
        let column_type: String = row
            .get(1)
            .map_err(|e| WorkerError::internal(format!("failed to read column type: {}", e)))?;
        columns.push((name, column_type));
    }

    let mut schema = Vec::with_capacity(columns.len());
    for (name, column_type) in &columns {
        let is_numeric = matches!(
            column_type.to_ascii_uppercase().as_str(),
            t if t.contains("INT") || t.contains("DOUBLE") || t.contains("FLOAT") || t.contains("DECIMAL")
        );

        let stats_sql = if is_numeric {
            format!(
                "SELECT MIN(\"{col}\"), MAX(\"{col}\"), NULL, SUM(CASE WHEN \"{col}\" IS NULL THEN 1 ELSE 0 END) FROM \"{table}\"",
                col = name,
                table = table_name
            )
        } else {
            format!(
                "SELECT NULL, NULL, COUNT(DISTINCT \"{col}\"), SUM(CASE WHEN \"{col}\" IS NULL THEN 1 ELSE 0 END) FROM \"{table}\"",
                col = name,
                table = table_name
            )
        };

        let mut stmt = conn
            .prepare(&stats_sql)
            .map_err(|e| WorkerError::internal(format!("failed to compute column stats: {}", e)))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| WorkerError::internal(format!("failed to compute column stats: {}", e)))?;

        let mut min = Json::Null;
        let mut max = Json::Null;
        let mut unique_count: Option<u64> = None;
        let mut null_count: Option<u64> = None;

        if let Some(row) = rows
            .next()
            .map_err(|e| WorkerError::internal(format!("failed to compute column stats: {}", e)))?
        {
            min = row.get_ref(0).map(value_ref_to_json).unwrap_or(Json::Null);
            max = row.get_ref(1).map(value_ref_to_json).unwrap_or(Json::Null);
            if let Ok(ValueRef::BigInt(n)) = row.get_ref(2) {
                unique_count = Some(n as u64);
            }
            if let Ok(v) = row.get_ref(3) {
                if let Json::Number(n) = value_ref_to_json(v) {
                    let nulls = n.as_u64().unwrap_or(0);
                    if nulls > 0 {
                        null_count = Some(nulls);
                    }
                }
            }
        }

        schema.push(ColumnSchema {
            name: name.clone(),
            column_type: column_type.clone(),
            stats: ColumnStats {
                min: if matches!(min, Json::Null) { None } else { Some(min) },
                max: if matches!(max, Json::Null) { None } else { Some(max) },
                unique_count,
                null_count,
            },
        });
    }

    let count_sql = format!("SELECT COUNT(*) FROM \"{}\"", table_name);
    let row_count: i64 = conn
        .query_row(&count_sql, [], |row| row.get(0))
        .map_err(|e| WorkerError::internal(format!("failed to count rows: {}", e)))?;

    Ok((schema, row_count.max(0) as u64))
}
