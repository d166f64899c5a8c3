//! Physical table descriptor

use crate::naming::{TableNameResolver, safe_column_name};
use crate::schema::FlattenedSchema;

/// Whether a table outlives the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableKind {
    #[default]
    Permanent,
    /// Session-scoped, suffixed name and no data retention
    Temporary,
}

/// Physical identity and column set of a target table
///
/// Derived from a stream and its flattened schema, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    /// Target schema name, as configured
    pub schema_name: String,
    /// Upper-cased, unquoted table name
    pub table_name: String,
    pub kind: TableKind,
    /// Column definitions (`"NAME" type`) in schema order
    pub column_definitions: Vec<String>,
    /// Quoted key column identifiers
    pub primary_key: Vec<String>,
}

impl TableDescriptor {
    /// Build the descriptor for `stream` in `schema_name`
    pub fn new(
        schema_name: impl Into<String>,
        stream: &str,
        kind: TableKind,
        columns: &FlattenedSchema,
        key_properties: &[String],
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: TableNameResolver::physical_table_name(
                stream,
                kind == TableKind::Temporary,
            ),
            kind,
            column_definitions: columns.iter().map(|c| c.definition()).collect(),
            primary_key: key_properties.iter().map(|k| safe_column_name(k)).collect(),
        }
    }

    /// Quoted table name without schema (`"ORDERS"`)
    pub fn quoted_name(&self) -> String {
        format!("\"{}\"", self.table_name)
    }

    /// Schema-qualified table name (`sales."ORDERS"`)
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.quoted_name())
    }

    pub fn is_temporary(&self) -> bool {
        self.kind == TableKind::Temporary
    }

    /// `data_retention_time_in_days` for the table
    pub fn retention_days(&self) -> u32 {
        match self.kind {
            TableKind::Permanent => 1,
            TableKind::Temporary => 0,
        }
    }

    /// Whether a catalog row (schema, table) refers to this table
    pub fn matches(&self, schema_name: &str, table_name: &str) -> bool {
        schema_name.eq_ignore_ascii_case(&self.schema_name)
            && table_name.eq_ignore_ascii_case(&self.table_name)
    }
}
