/// Query Execution Module
///
/// Runs resolved, substituted statements against the registry's servers and
/// encodes read results into the bridge's flat string form.

use crate::core::db::address::{resolve, ResolvedAddress};
use crate::core::db::connection::ServerRegistry;
use crate::core::db::payload::{substitute_insert, substitute_update, Payload, Statement};
use crate::core::{BridgeError, Result};
use rusqlite::{types::ValueRef, Connection};
use std::sync::Arc;
use tracing::{debug, error};

/// Value of a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// No row, or a single column holding SQL NULL
    Absent,
    /// One row, one column
    Scalar(String),
    /// One row, several columns, as `(name, value)` in column order
    Flattened(Vec<(String, String)>),
}

impl ExecutionResult {
    /// Encodes the result as the bridge's wire string
    ///
    /// Scalars are returned verbatim, flattened rows as `name=value` pairs
    /// joined by `&`, and `Absent` as `None`.
    pub fn into_value(self) -> Option<String> {
        match self {
            ExecutionResult::Absent => None,
            ExecutionResult::Scalar(value) => Some(value),
            ExecutionResult::Flattened(pairs) => Some(
                pairs
                    .iter()
                    .map(|(name, value)| format!("{}={}", name, value))
                    .collect::<Vec<_>>()
                    .join("&"),
            ),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, ExecutionResult::Absent)
    }
}

/// Outcome of a select: the first row only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectResult {
    pub result: ExecutionResult,
    /// `true` when the query produced rows past the first, which were ignored
    pub additional_rows: bool,
}

impl SelectResult {
    pub fn into_value(self) -> Option<String> {
        self.result.into_value()
    }
}

/// Executes select, update and insert addresses against a registry
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    registry: Arc<ServerRegistry>,
}

impl QueryExecutor {
    pub fn new(registry: Arc<ServerRegistry>) -> Self {
        QueryExecutor { registry }
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    /// Runs a read-only select address and returns its first row
    ///
    /// # Errors
    ///
    /// `AddressResolution` for an unknown server, `Execution` when the
    /// statement cannot be prepared or run, or writes to the database.
    pub fn select(&self, address: &str) -> Result<SelectResult> {
        let resolved = resolve(&self.registry, address);
        let server = resolved.require_server()?;
        server
            .with_connection(|conn| read_first_row(conn, &resolved.template))
            .map_err(|e| report(&resolved, e))
    }

    /// Runs an update address with the payload applied
    ///
    /// Returns the number of rows changed.
    pub fn update(&self, address: &str, payload: &str) -> Result<usize> {
        self.write(address, payload, substitute_update)
    }

    /// Runs an insert address with the payload applied
    ///
    /// Returns the number of rows inserted.
    pub fn insert(&self, address: &str, payload: &str) -> Result<usize> {
        self.write(address, payload, substitute_insert)
    }

    fn write(
        &self,
        address: &str,
        payload: &str,
        substitute: fn(&str, &Payload) -> Statement,
    ) -> Result<usize> {
        let resolved = resolve(&self.registry, address);
        let server = resolved.require_server()?;
        let payload = Payload::parse(payload);
        debug!(
            "DB write on {} with {} payload: {}",
            resolved.server_id,
            if payload.is_named() { "named" } else { "single" },
            payload.raw()
        );

        let statement = substitute(&resolved.template, &payload);
        server
            .with_connection(|conn| execute_statement(conn, &statement))
            .map_err(|e| report(&resolved, e))
    }
}

/// Runs `sql` as a read and encodes the first row
///
/// The statement is rejected unless SQLite reports it read-only.
pub fn read_first_row(conn: &Connection, sql: &str) -> Result<SelectResult> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| BridgeError::Execution(format!("Failed to prepare statement: {}", e)))?;
    if !stmt.readonly() {
        return Err(BridgeError::Execution(format!(
            "select template is not read-only: {}",
            sql
        )));
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt
        .query([])
        .map_err(|e| BridgeError::Execution(format!("Query execution failed: {}", e)))?;

    let first = rows
        .next()
        .map_err(|e| BridgeError::Execution(format!("Result processing failed: {}", e)))?;
    let had_row = first.is_some();
    let result = match first {
        None => ExecutionResult::Absent,
        Some(row) if columns.len() == 1 => match row.get_ref(0)? {
            ValueRef::Null => ExecutionResult::Absent,
            value => ExecutionResult::Scalar(format_value(value)),
        },
        Some(row) => {
            let mut pairs = Vec::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                pairs.push((name.clone(), format_value(row.get_ref(i)?)));
            }
            ExecutionResult::Flattened(pairs)
        }
    };

    let additional_rows = had_row
        && rows
            .next()
            .map_err(|e| BridgeError::Execution(format!("Result processing failed: {}", e)))?
            .is_some();
    if additional_rows {
        debug!("select returned more than one row, using the first: {}", sql);
    }

    Ok(SelectResult {
        result,
        additional_rows,
    })
}

/// Runs a substituted write statement and returns the affected row count
///
/// A filled statement that still contains placeholders, or a bound one with
/// more than the single placeholder it fills, is refused rather than run
/// with NULLs.
pub fn execute_statement(conn: &Connection, statement: &Statement) -> Result<usize> {
    let mut stmt = conn
        .prepare(statement.sql())
        .map_err(|e| BridgeError::Execution(format!("Failed to prepare statement: {}", e)))?;

    let changed = match statement {
        Statement::Filled { .. } => {
            let unfilled = stmt.parameter_count();
            if unfilled > 0 {
                return Err(BridgeError::Execution(format!(
                    "statement still has {} unfilled placeholder(s): {}",
                    unfilled,
                    statement.sql()
                )));
            }
            stmt.raw_execute()
        }
        Statement::Bound { value, .. } => {
            match stmt.parameter_count() {
                0 => {
                    return Err(BridgeError::Execution(format!(
                        "template has no placeholder for value '{}': {}",
                        value,
                        statement.sql()
                    )))
                }
                1 => {}
                n => {
                    return Err(BridgeError::Execution(format!(
                        "statement has {} placeholders, single value binds one: {}",
                        n,
                        statement.sql()
                    )))
                }
            }
            stmt.raw_bind_parameter(1, value.as_str())
                .and_then(|_| stmt.raw_execute())
        }
    }
    .map_err(|e| BridgeError::Execution(format!("Statement execution failed: {}", e)))?;

    Ok(changed)
}

fn report(resolved: &ResolvedAddress, err: BridgeError) -> BridgeError {
    error!(
        "failed to execute on server {}: {} [{}]",
        resolved.server_id, err, resolved.template
    );
    err
}

/// Formats a SQLite value as text
fn format_value(value: ValueRef) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => format!("{:?}", f),
        ValueRef::Text(t) => String::from_utf8_lossy(t).to_string(),
        ValueRef::Blob(b) => format!("<BLOB: {} bytes>", b.len()),
    }
}
