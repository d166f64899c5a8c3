//! Error taxonomy for the loader
//!
//! Every fallible operation in the crate returns [`LoaderResult`]. Warehouse
//! failures keep their structured code so that [`crate::database::classify`]
//! can decide which ones are benign.

use std::path::PathBuf;
use thiserror::Error;

/// Structured error reported by the warehouse for a single statement
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.render())]
pub struct WarehouseError {
    /// Vendor error code (e.g. "002003")
    pub code: Option<String>,
    /// ANSI SQL state (e.g. "02000")
    pub sql_state: Option<String>,
    /// Human readable message
    pub message: String,
}

impl WarehouseError {
    /// Create an error with only a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            sql_state: None,
            message: message.into(),
        }
    }

    /// Create an error with a vendor code and SQL state
    pub fn with_code(
        code: impl Into<String>,
        sql_state: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: Some(code.into()),
            sql_state: Some(sql_state.into()),
            message: message.into(),
        }
    }

    fn render(&self) -> String {
        match (&self.code, &self.sql_state) {
            (Some(code), Some(state)) => format!("{} ({}): {}", code, state, self.message),
            (Some(code), None) => format!("{}: {}", code, self.message),
            _ => self.message.clone(),
        }
    }
}

/// Error type for loader operations
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Invalid or incomplete configuration, detected before any connection
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Two source properties flatten to the same column name
    #[error("Duplicate column name produced in schema: {0}")]
    SchemaConflict(String),

    /// A flattened column name stays over the identifier length limit
    #[error("Column name too long after shortening ({length} characters): {name}")]
    ColumnNameTooLong { name: String, length: usize },

    /// A bounded query returned more rows than allowed
    #[error("Query returned too many records. This query can return max {max_records} records")]
    ResultSetTooLarge { max_records: usize },

    /// Warehouse statement failed in a way no classifier recognised as benign
    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    /// Network or HTTP failure talking to the ingestion service
    #[error("Transient ingestion failure: {0}")]
    TransientIngestion(String),

    /// Submission kept failing until the retry budget ran out
    #[error("Max retry limit reached after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The ingestion service answered but refused the request
    #[error("Ingestion rejected: {0}")]
    Ingestion(String),

    /// A record is missing one of the declared key properties
    #[error("Cannot find {keys:?} primary key(s) in record")]
    MissingPrimaryKey { keys: Vec<String> },

    /// Signing key could not be loaded or used
    #[error("Authentication error: {0}")]
    Auth(String),

    /// File could not be read or written
    #[error("IO error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LoaderError {
    /// Whether the run must stop when this error surfaces
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LoaderError::TransientIngestion(_))
    }

    /// Process exit status a caller should use when terminating on this error
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() { 1 } else { 0 }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        LoaderError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        LoaderError::Serialization(err.to_string())
    }
}

/// Result type for loader operations
pub type LoaderResult<T> = Result<T, LoaderError>;
