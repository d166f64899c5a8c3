//! Stream schema message model

use serde::{Deserialize, Serialize};

use crate::schema::PropertySchema;

/// Schema announcement for one stream
///
/// Read once per sync run; the flattened column set derived from it does not
/// change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSchemaMessage {
    /// Stream identifier (e.g. "sales-orders")
    pub stream: String,
    /// Root JSON schema carrying `properties`
    pub schema: PropertySchema,
    /// Primary key property paths
    #[serde(default)]
    pub key_properties: Vec<String>,
}

impl StreamSchemaMessage {
    pub fn new(stream: impl Into<String>, schema: PropertySchema, key_properties: Vec<String>) -> Self {
        Self {
            stream: stream.into(),
            schema,
            key_properties,
        }
    }

    /// Whether the stream declares key properties
    pub fn has_key_properties(&self) -> bool {
        !self.key_properties.is_empty()
    }
}
