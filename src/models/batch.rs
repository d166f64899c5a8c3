//! Staged batch model

use serde::{Deserialize, Serialize};

/// A batch file staged for loading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedBatch {
    /// Opaque reference returned by the upload client (object key)
    pub reference: String,
    /// Number of rows in the staged file
    pub row_count: usize,
    /// Size of the staged file in bytes
    pub size_bytes: u64,
    /// Stream the batch belongs to
    pub stream: String,
}

impl StagedBatch {
    pub fn new(
        reference: impl Into<String>,
        row_count: usize,
        size_bytes: u64,
        stream: impl Into<String>,
    ) -> Self {
        Self {
            reference: reference.into(),
            row_count,
            size_bytes,
            stream: stream.into(),
        }
    }
}
