//! Warehouse access layer
//!
//! This module provides the warehouse abstraction the loader talks to:
//! - [`Warehouse`]: opens a fresh connection per operation
//! - [`WarehouseConnection`]: executes statements on that connection
//! - [`query`]: runs one statement or a transactional list with a row guard
//!
//! Catalog introspection, statement builders, the table reconciler and the
//! HTTP-based SQL API client live in the submodules.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

pub mod catalog;
pub mod classify;
pub mod reconcile;
pub mod sql;
pub mod sql_api;

pub use catalog::{CatalogCache, CatalogRow, CatalogSnapshot};
pub use classify::{ErrorClassifier, SnowflakeErrorClassifier, WarehouseErrorKind};
pub use reconcile::{ReconcileChanges, ReconcileOutcome, TableReconciler, TableState};
pub use sql_api::SqlApiWarehouse;

use crate::error::{LoaderError, LoaderResult, WarehouseError};

/// Query result row as a JSON object keyed by column name
pub type QueryRow = serde_json::Value;

/// Query result set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names
    pub columns: Vec<String>,
    /// Rows of data
    pub rows: Vec<QueryRow>,
    /// Number of rows affected (for INSERT/UPDATE/DELETE)
    pub rows_affected: Option<u64>,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create a new query result
    pub fn new(columns: Vec<String>, rows: Vec<QueryRow>) -> Self {
        Self {
            columns,
            rows,
            rows_affected: None,
            execution_time_ms: 0,
        }
    }

    /// Create an empty result
    pub fn empty() -> Self {
        Self::default()
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Integer value of `column` in the first row
    ///
    /// Accepts JSON numbers and numeric strings; anything else yields 0.
    pub fn first_row_count(&self, column: &str) -> u64 {
        self.rows
            .first()
            .and_then(|row| row.get(column))
            .map(value_as_u64)
            .unwrap_or(0)
    }
}

/// Interpret a cell as an unsigned count
pub fn value_as_u64(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Text value of `column` in a row, if present
pub fn row_str<'a>(row: &'a QueryRow, column: &str) -> Option<&'a str> {
    row.get(column).and_then(|v| v.as_str())
}

/// Per-connection session settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Rendered query tag
    pub query_tag: Option<String>,
}

impl SessionOptions {
    pub fn with_query_tag(query_tag: Option<String>) -> Self {
        Self { query_tag }
    }

    /// Session parameters sent with every connection
    ///
    /// Quoted identifiers are always case sensitive.
    pub fn parameters(&self) -> Vec<(&'static str, String)> {
        let mut parameters = vec![("QUOTED_IDENTIFIERS_IGNORE_CASE", "FALSE".to_string())];
        if let Some(tag) = &self.query_tag {
            parameters.push(("QUERY_TAG", tag.clone()));
        }
        parameters
    }
}

/// A live connection executing statements
pub trait WarehouseConnection {
    /// Execute a single statement
    fn execute(&mut self, sql: &str) -> Result<QueryResult, WarehouseError>;

    /// Execute statements in order on this connection
    ///
    /// Stops at the first failing statement.
    fn execute_all(&mut self, statements: &[String]) -> Result<Vec<QueryResult>, WarehouseError> {
        statements.iter().map(|sql| self.execute(sql)).collect()
    }
}

/// Warehouse that hands out connections
///
/// Every operation opens its own connection and drops it when done; there is
/// no pooling across calls.
pub trait Warehouse: Send + Sync {
    /// Open a new connection with the given session settings
    fn open_connection(
        &self,
        session: &SessionOptions,
    ) -> LoaderResult<Box<dyn WarehouseConnection + '_>>;
}

/// Statements for a single [`query`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statements {
    /// A single statement, run as is
    One(String),
    /// A list run inside one explicit transaction
    Transaction(Vec<String>),
}

impl From<String> for Statements {
    fn from(sql: String) -> Self {
        Statements::One(sql)
    }
}

impl From<&str> for Statements {
    fn from(sql: &str) -> Self {
        Statements::One(sql.to_string())
    }
}

impl From<Vec<String>> for Statements {
    fn from(list: Vec<String>) -> Self {
        Statements::Transaction(list)
    }
}

/// Run statements on a fresh connection and return the last result
///
/// A list is wrapped in `START TRANSACTION` / `COMMIT`. When `max_records`
/// is non-zero, any statement returning more rows fails the call with
/// [`LoaderError::ResultSetTooLarge`].
///
/// # Arguments
///
/// * `warehouse` - Warehouse to connect to
/// * `session` - Session settings for the new connection
/// * `statements` - One statement or a transactional list
/// * `max_records` - Row guard, 0 disables it
pub fn query(
    warehouse: &dyn Warehouse,
    session: &SessionOptions,
    statements: impl Into<Statements>,
    max_records: usize,
) -> LoaderResult<QueryResult> {
    let statements = statements.into();
    let mut connection = warehouse.open_connection(session)?;
    let started = Instant::now();

    let (batch, in_transaction) = match statements {
        Statements::One(sql) => (vec![sql], false),
        Statements::Transaction(list) => {
            let mut batch = Vec::with_capacity(list.len() + 2);
            batch.push("START TRANSACTION".to_string());
            batch.extend(list);
            batch.push("COMMIT".to_string());
            (batch, true)
        }
    };

    for sql in &batch {
        debug!("Running query: {}", sql);
    }

    let mut results = connection.execute_all(&batch)?;
    if in_transaction {
        // drop the COMMIT result
        results.pop();
    }

    for result in &results {
        if max_records > 0 && result.row_count() > max_records {
            return Err(LoaderError::ResultSetTooLarge { max_records });
        }
    }

    let mut last = results.pop().unwrap_or_default();
    last.execution_time_ms = started.elapsed().as_millis() as u64;
    Ok(last)
}
