//! Per-stream loading context
//!
//! Everything derived from one schema message is computed here once, before
//! any network access: the target schema and grantees, the flattened column
//! set, the table descriptor and the session settings.

use serde_json::{Map, Value};

use crate::config::LoaderConfig;
use crate::database::SessionOptions;
use crate::error::LoaderResult;
use crate::models::{StreamSchemaMessage, TableDescriptor, TableKind};
use crate::naming::{ResolvedTarget, TableNameResolver, create_query_tag};
use crate::schema::{
    FlattenedRecord, FlattenedSchema, flatten_record, flatten_schema, record_primary_key_string,
    record_to_csv_line,
};

/// Immutable state for loading one stream
#[derive(Debug, Clone)]
pub struct StreamContext {
    message: StreamSchemaMessage,
    target: ResolvedTarget,
    columns: FlattenedSchema,
    table: TableDescriptor,
    session: SessionOptions,
    max_level: usize,
}

impl StreamContext {
    /// Resolve and flatten a stream's schema message
    ///
    /// Fails with a configuration error when no target schema is configured
    /// for the stream, or a schema conflict when two properties flatten to
    /// the same column.
    pub fn new(config: &LoaderConfig, message: StreamSchemaMessage) -> LoaderResult<Self> {
        let target = TableNameResolver::resolve_target(config, &message.stream)?;
        let max_level = config.data_flattening_max_level;
        let columns = flatten_schema(&message.schema, max_level)?;

        let table = TableDescriptor::new(
            target.schema_name.clone(),
            &message.stream,
            TableKind::Permanent,
            &columns,
            &message.key_properties,
        );

        let session = SessionOptions::with_query_tag(create_query_tag(
            config.query_tag.as_deref(),
            Some(&target.schema_name),
            Some(&table.quoted_name()),
        ));

        Ok(Self {
            message,
            target,
            columns,
            table,
            session,
            max_level,
        })
    }

    pub fn stream(&self) -> &str {
        &self.message.stream
    }

    pub fn message(&self) -> &StreamSchemaMessage {
        &self.message
    }

    pub fn key_properties(&self) -> &[String] {
        &self.message.key_properties
    }

    pub fn target(&self) -> &ResolvedTarget {
        &self.target
    }

    /// Flattened column set
    pub fn columns(&self) -> &FlattenedSchema {
        &self.columns
    }

    /// Permanent target table
    pub fn table(&self) -> &TableDescriptor {
        &self.table
    }

    /// Temporary variant of the target table
    pub fn temporary_table(&self) -> TableDescriptor {
        TableDescriptor::new(
            self.target.schema_name.clone(),
            &self.message.stream,
            TableKind::Temporary,
            &self.columns,
            &self.message.key_properties,
        )
    }

    pub fn session(&self) -> &SessionOptions {
        &self.session
    }

    pub fn max_level(&self) -> usize {
        self.max_level
    }

    pub fn flatten_record(&self, record: &Map<String, Value>) -> FlattenedRecord {
        flatten_record(record, &self.columns, self.max_level)
    }

    /// Staged CSV line for a raw record
    pub fn record_to_csv_line(&self, record: &Map<String, Value>) -> String {
        record_to_csv_line(&self.flatten_record(record), &self.columns)
    }

    /// Primary key string for a raw record, `None` without key properties
    pub fn record_primary_key_string(
        &self,
        record: &Map<String, Value>,
    ) -> LoaderResult<Option<String>> {
        record_primary_key_string(&self.flatten_record(record), &self.message.key_properties)
    }
}
