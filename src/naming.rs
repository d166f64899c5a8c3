//! Name resolution for streams, tables and columns
//!
//! Turns logical stream identifiers into physical warehouse identifiers and
//! resolves the target schema and grantees a stream loads into.

use crate::config::{Grantees, LoaderConfig};
use crate::error::{LoaderError, LoaderResult};

/// Default separator between stream name segments
pub const DEFAULT_STREAM_SEPARATOR: char = '-';

/// Suffix appended to temporary table names
pub const TEMPORARY_TABLE_SUFFIX: &str = "_temp";

/// Segments of a logical stream identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamName {
    /// Ignored catalog qualifier (only present with 3+ segments)
    pub catalog_name: Option<String>,
    /// Source schema, if the stream identifier carries one
    pub schema_name: Option<String>,
    /// Source table name
    pub table_name: String,
}

impl StreamName {
    /// Split a stream identifier on `separator`
    ///
    /// # Examples
    ///
    /// ```
    /// use warehouse_loader::naming::StreamName;
    ///
    /// let name = StreamName::parse("sales-orders", '-');
    /// assert_eq!(name.schema_name.as_deref(), Some("sales"));
    /// assert_eq!(name.table_name, "orders");
    /// ```
    pub fn parse(stream: &str, separator: char) -> Self {
        let segments: Vec<&str> = stream.split(separator).collect();

        match segments.len() {
            2 => Self {
                catalog_name: None,
                schema_name: Some(segments[0].to_string()),
                table_name: segments[1].to_string(),
            },
            n if n > 2 => Self {
                catalog_name: Some(segments[0].to_string()),
                schema_name: Some(segments[1].to_string()),
                table_name: segments[2..].join("_"),
            },
            _ => Self {
                catalog_name: None,
                schema_name: None,
                table_name: stream.to_string(),
            },
        }
    }
}

/// Where a stream lands and who may read it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Target schema name, as configured
    pub schema_name: String,
    /// Roles receiving read privileges, if any
    pub grantees: Option<Grantees>,
}

/// Resolves target schemas and physical table names for streams
pub struct TableNameResolver;

impl TableNameResolver {
    /// Resolve the target schema and grantees for `stream`
    ///
    /// A per source-schema mapping wins over the defaults. Fails with a
    /// configuration error when no target schema can be determined.
    pub fn resolve_target(config: &LoaderConfig, stream: &str) -> LoaderResult<ResolvedTarget> {
        let source_schema = StreamName::parse(stream, DEFAULT_STREAM_SEPARATOR).schema_name;

        let mapping = source_schema.as_ref().and_then(|schema| {
            config
                .schema_mapping
                .as_ref()
                .and_then(|mapping| mapping.get(schema))
        });

        let default_schema = config
            .default_target_schema
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let schema_name = match mapping {
            Some(entry) => entry.target_schema.as_deref(),
            None => default_schema,
        };

        let schema_name = match schema_name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                return Err(LoaderError::Configuration(format!(
                    "Target schema name not defined in config. Neither 'default_target_schema' \
                     (string) nor 'schema_mapping' (object) defines target schema for {} stream.",
                    stream
                )));
            }
        };

        let grantees = mapping
            .and_then(|entry| entry.target_schema_select_permissions.clone())
            .or_else(|| config.default_target_schema_select_permissions.clone());

        Ok(ResolvedTarget {
            schema_name,
            grantees,
        })
    }

    /// Normalised, upper-cased table name for `stream` (unquoted)
    pub fn physical_table_name(stream: &str, temporary: bool) -> String {
        let table = StreamName::parse(stream, DEFAULT_STREAM_SEPARATOR).table_name;
        let mut name = table.replace(['.', '-'], "_").to_lowercase();
        if temporary {
            name.push_str(TEMPORARY_TABLE_SUFFIX);
        }
        name.to_uppercase()
    }
}

/// Quote a column name the way the warehouse stores it
///
/// Upper-cases the whole quoted identifier.
pub fn safe_column_name(name: &str) -> String {
    format!("\"{}\"", name).to_uppercase()
}

/// Render a query tag pattern for a stream
///
/// Returns `None` when no pattern is configured. Missing schema or table
/// values fall back to `unknown-schema` / `unknown-table`.
pub fn create_query_tag(
    pattern: Option<&str>,
    schema: Option<&str>,
    table: Option<&str>,
) -> Option<String> {
    let pattern = pattern?;

    Some(
        pattern
            .replace("{schema}", schema.unwrap_or("unknown-schema"))
            .replace("{table}", table.unwrap_or("unknown-table")),
    )
}
