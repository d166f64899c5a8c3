//! Catalog snapshots and live introspection
//!
//! A [`CatalogSnapshot`] holds (schema, table, column, type) rows. It is
//! either fresh from the warehouse or a cached copy, and is replaced whole
//! after any structural change.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::classify::{ErrorClassifier, WarehouseErrorKind};
use super::sql::{self, INTROSPECTION_MAX_RECORDS};
use super::{QueryRow, SessionOptions, Warehouse, query, row_str};
use crate::error::{LoaderError, LoaderResult};
use crate::models::TableDescriptor;

/// One catalog row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub schema_name: String,
    pub table_name: String,
    /// Absent for table-only listings
    pub column_name: Option<String>,
    pub data_type: Option<String>,
}

impl CatalogRow {
    pub fn column(
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        column_name: impl Into<String>,
        data_type: impl Into<String>,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            column_name: Some(column_name.into()),
            data_type: Some(data_type.into()),
        }
    }

    fn from_query_row(row: &QueryRow) -> Option<Self> {
        Some(Self {
            schema_name: row_str(row, "SCHEMA_NAME")?.to_string(),
            table_name: row_str(row, "TABLE_NAME")?.to_string(),
            column_name: row_str(row, "COLUMN_NAME").map(str::to_string),
            data_type: row_str(row, "DATA_TYPE").map(str::to_string),
        })
    }
}

/// Snapshot of existing schemas, tables and columns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub rows: Vec<CatalogRow>,
}

/// Optional cache carried between reconciliation passes
pub type CatalogCache = Option<CatalogSnapshot>;

impl CatalogSnapshot {
    pub fn new(rows: Vec<CatalogRow>) -> Self {
        Self { rows }
    }

    /// Whether any row belongs to `schema_name` (case-insensitive)
    pub fn has_schema(&self, schema_name: &str) -> bool {
        self.rows
            .iter()
            .any(|r| r.schema_name.eq_ignore_ascii_case(schema_name))
    }

    /// Whether any row belongs to `table`
    pub fn has_table(&self, table: &TableDescriptor) -> bool {
        self.rows
            .iter()
            .any(|r| table.matches(&r.schema_name, &r.table_name))
    }

    /// Column types of `table`, keyed by upper-cased column name
    pub fn columns_of(&self, table: &TableDescriptor) -> HashMap<String, String> {
        self.rows
            .iter()
            .filter(|r| table.matches(&r.schema_name, &r.table_name))
            .filter_map(|r| {
                let column = r.column_name.as_ref()?;
                Some((
                    column.to_uppercase(),
                    r.data_type.clone().unwrap_or_default(),
                ))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Live catalog introspection for one database
pub struct CatalogQueries<'a> {
    warehouse: &'a dyn Warehouse,
    session: &'a SessionOptions,
    dbname: &'a str,
    classifier: &'a dyn ErrorClassifier,
}

impl<'a> CatalogQueries<'a> {
    pub fn new(
        warehouse: &'a dyn Warehouse,
        session: &'a SessionOptions,
        dbname: &'a str,
        classifier: &'a dyn ErrorClassifier,
    ) -> Self {
        Self {
            warehouse,
            session,
            dbname,
            classifier,
        }
    }

    /// Run an introspection transaction, treating a missing schema as empty
    fn introspect(&self, statements: Vec<String>) -> LoaderResult<Vec<CatalogRow>> {
        match query(
            self.warehouse,
            self.session,
            statements,
            INTROSPECTION_MAX_RECORDS,
        ) {
            Ok(result) => Ok(result
                .rows
                .iter()
                .filter_map(CatalogRow::from_query_row)
                .collect()),
            Err(e) if self.classifier.classify_loader_error(&e)
                == WarehouseErrorKind::ObjectDoesNotExist =>
            {
                debug!("Schema not found during introspection: {}", e);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Tables in the given schemas
    pub fn get_tables(&self, schemas: &[String]) -> LoaderResult<Vec<CatalogRow>> {
        if schemas.is_empty() {
            return Err(LoaderError::Configuration(
                "Cannot get tables. List of table schemas empty".to_string(),
            ));
        }

        let mut tables = Vec::new();
        for schema in schemas {
            tables.extend(self.introspect(sql::list_tables(self.dbname, schema))?);
        }
        Ok(tables)
    }

    /// Columns of every table in the given schemas
    pub fn get_table_columns(&self, schemas: &[String]) -> LoaderResult<CatalogSnapshot> {
        if schemas.is_empty() {
            return Err(LoaderError::Configuration(
                "Cannot get table columns. List of table schemas empty".to_string(),
            ));
        }

        let mut rows = Vec::new();
        for schema in schemas {
            rows.extend(self.introspect(sql::list_columns(self.dbname, schema))?);
        }
        Ok(CatalogSnapshot::new(rows))
    }

    /// Whether a schema exists, by live lookup
    pub fn schema_exists(&self, schema_name: &str) -> LoaderResult<bool> {
        let result = query(
            self.warehouse,
            self.session,
            sql::show_schemas_like(schema_name),
            0,
        )?;
        Ok(!result.is_empty())
    }
}
