//! Read-only execution of validated statements.
//!
//! One connection per turn, opened read-only against the SQLite file that
//! holds the service-request table. The statement runs on a blocking worker
//! raced against a wall-clock timeout; on timeout the connection's interrupt
//! handle cancels the query and the connection is discarded for the turn.
//! Raw database error text is logged, never surfaced.

use crate::error::{AssistantError, Result};
use crate::result_table::{ResultTable, Scalar};
use crate::schema::{ColumnType, TableSchema};
use crate::sql_compiler::CandidateQuery;
use chrono::NaiveDate;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, ToSql};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct SqlEngine {
    database_path: PathBuf,
    schema: TableSchema,
    row_cap: usize,
    timeout: Duration,
}

impl SqlEngine {
    pub fn new(database_path: PathBuf, schema: TableSchema, row_cap: usize, timeout: Duration) -> Self {
        Self {
            database_path,
            schema,
            row_cap,
            timeout,
        }
    }

    /// Execute a validated candidate. Returns at most `row_cap` rows with
    /// the truncation flag set when more existed.
    pub async fn execute(&self, candidate: &CandidateQuery) -> Result<ResultTable> {
        let conn = Connection::open_with_flags(
            &self.database_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            error!(error = %e, path = %self.database_path.display(), "could not open database");
            AssistantError::ExecutionError("the dataset is not available".to_string())
        })?;
        let interrupt = conn.get_interrupt_handle();

        let statement = candidate.statement.clone();
        let params = candidate.params.clone();
        let row_cap = self.row_cap;
        let schema = self.schema.clone();

        let worker = tokio::task::spawn_blocking(move || {
            run_statement(&conn, &statement, &params, row_cap, &schema)
        });

        match tokio::time::timeout(self.timeout, worker).await {
            Ok(Ok(result)) => {
                if let Ok(ref table) = result {
                    info!(
                        rows = table.row_count(),
                        truncated = table.truncated,
                        "query executed"
                    );
                }
                result
            }
            Ok(Err(join_error)) => {
                error!(error = %join_error, "query worker failed");
                Err(AssistantError::ExecutionError(
                    "the query could not be completed".to_string(),
                ))
            }
            Err(_) => {
                // Cancel the in-flight query; the worker drops the
                // connection once the interrupt takes effect.
                interrupt.interrupt();
                warn!(timeout_ms = self.timeout.as_millis() as u64, "query timed out");
                Err(AssistantError::ExecutionTimeout(self.timeout.as_millis() as u64))
            }
        }
    }
}

fn run_statement(
    conn: &Connection,
    sql: &str,
    params: &[(String, Scalar)],
    row_cap: usize,
    schema: &TableSchema,
) -> Result<ResultTable> {
    let mut stmt = conn.prepare(sql).map_err(|e| {
        error!(error = %e, "statement failed to prepare");
        AssistantError::ExecutionError("the query could not be prepared".to_string())
    })?;

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let bound: Vec<(&str, &dyn ToSql)> = params
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect();

    let mut rows = stmt.query(&bound[..]).map_err(|e| {
        error!(error = %e, "query failed to start");
        AssistantError::ExecutionError("the query could not be executed".to_string())
    })?;

    let mut table = ResultTable::new(columns.clone());
    loop {
        let row = rows.next().map_err(|e| {
            error!(error = %e, "query failed mid-scan");
            AssistantError::ExecutionError("the query failed while reading rows".to_string())
        })?;
        let row = match row {
            Some(row) => row,
            None => break,
        };
        if table.rows.len() == row_cap {
            table.truncated = true;
            break;
        }
        let mut cells = Vec::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            let value = row.get_ref(idx).map_err(|e| {
                error!(error = %e, "row cell read failed");
                AssistantError::ExecutionError("the query returned an unreadable row".to_string())
            })?;
            cells.push(decode_cell(value, schema.column(column).map(|c| c.column_type)));
        }
        table.rows.push(cells);
    }

    Ok(table)
}

/// Decode a SQLite cell using the schema's type when the select list exposes
/// a raw column; aggregate aliases fall back to the storage type.
fn decode_cell(value: ValueRef<'_>, declared: Option<ColumnType>) -> Scalar {
    match value {
        ValueRef::Null => Scalar::Null,
        ValueRef::Integer(i) => match declared {
            Some(ColumnType::Boolean) => Scalar::Bool(i != 0),
            _ => Scalar::Int(i),
        },
        ValueRef::Real(f) => Scalar::Real(f),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).to_string();
            match declared {
                Some(ColumnType::Date) => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                    .map(Scalar::Date)
                    .unwrap_or(Scalar::Text(text)),
                _ => Scalar::Text(text),
            }
        }
        ValueRef::Blob(_) => Scalar::Null,
    }
}
