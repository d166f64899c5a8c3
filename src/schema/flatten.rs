//! Schema flattening
//!
//! Nested object properties are folded into columns named after their path
//! (`parent__child`) up to a configurable depth. Deeper structures become
//! semi-structured leaf columns.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, warn};

use super::types::{ColumnType, JsonTypes, LoadTransform, PropertySchema, TypeMapper};
use crate::error::{LoaderError, LoaderResult};
use crate::naming::safe_column_name;

/// Separator between path segments of a flattened column name
pub const KEY_SEPARATOR: &str = "__";

/// Maximum identifier length accepted by the warehouse
pub const MAX_COLUMN_NAME_LENGTH: usize = 255;

static CAMELIZE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|_)(.)").expect("Invalid regex"));
static LOWERCASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z]").expect("Invalid regex"));

fn camelize(segment: &str) -> String {
    CAMELIZE
        .replace_all(segment, |caps: &regex::Captures| caps[1].to_uppercase())
        .into_owned()
}

fn joined_len(segments: &[String], separator: &str) -> usize {
    let chars: usize = segments.iter().map(|s| s.chars().count()).sum();
    chars + separator.chars().count() * segments.len().saturating_sub(1)
}

/// Join a nested property path into a column name
///
/// When the joined name reaches [`MAX_COLUMN_NAME_LENGTH`], path segments are
/// compressed left to right until it fits or every segment was compressed.
/// A compressed segment keeps the capitals of its camel-cased form, or its
/// first three characters if that leaves fewer than two.
///
/// # Arguments
///
/// * `name` - Property name
/// * `parent_path` - Names of the enclosing properties, outermost first
/// * `separator` - Segment separator
pub fn flatten_key(name: &str, parent_path: &[String], separator: &str) -> String {
    let mut segments: Vec<String> = parent_path.to_vec();
    segments.push(name.to_string());

    let mut index = 0;
    while joined_len(&segments, separator) >= MAX_COLUMN_NAME_LENGTH && index < segments.len() {
        let reduced = LOWERCASE
            .replace_all(&camelize(&segments[index]), "")
            .into_owned();

        segments[index] = if reduced.chars().count() > 1 {
            reduced.to_lowercase()
        } else {
            segments[index].chars().take(3).collect::<String>().to_lowercase()
        };
        index += 1;
    }

    segments.join(separator)
}

/// A single column of a flattened schema
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenedColumn {
    /// Flattened key (`parent__child`), source casing
    pub name: String,
    /// Original property path, outermost first
    pub source_path: Vec<String>,
    /// Property descriptor the column was produced from
    pub property: PropertySchema,
    /// Mapped warehouse type
    pub column_type: ColumnType,
    /// Load-time transform for staged cells
    pub transform: Option<LoadTransform>,
}

impl FlattenedColumn {
    fn new(name: String, source_path: Vec<String>, property: PropertySchema) -> Self {
        let column_type = TypeMapper::column_type(&property);
        let transform = TypeMapper::column_transform(&property);
        Self {
            name,
            source_path,
            property,
            column_type,
            transform,
        }
    }

    /// Upper-cased name as stored by the warehouse
    pub fn warehouse_name(&self) -> String {
        self.name.to_uppercase()
    }

    /// Quoted identifier used in statements
    pub fn identifier(&self) -> String {
        safe_column_name(&self.name)
    }

    /// Column definition clause (`"NAME" type`)
    pub fn definition(&self) -> String {
        format!("{} {}", self.identifier(), self.column_type)
    }
}

/// Ordered, duplicate-free set of flattened columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlattenedSchema {
    columns: Vec<FlattenedColumn>,
}

impl FlattenedSchema {
    /// Columns in lexicographic name order
    pub fn columns(&self) -> &[FlattenedColumn] {
        &self.columns
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlattenedColumn> {
        self.columns.iter()
    }

    /// Look up a column by its flattened key
    pub fn get(&self, name: &str) -> Option<&FlattenedColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Flattened keys in column order
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Normalise a union property to its first alternative
///
/// Only string, array and object alternatives are supported; they are made
/// nullable.
fn normalise_union(name: &str, property: &PropertySchema) -> Option<PropertySchema> {
    let first = property.any_of.as_ref()?.first()?;

    let non_null: Vec<&String> = first
        .types
        .as_ref()
        .map(|t| t.as_slice().iter().filter(|t| *t != "null").collect())
        .unwrap_or_default();

    match non_null.as_slice() {
        [t] if matches!(t.as_str(), "string" | "array" | "object") => {
            let mut normalised = first.clone();
            normalised.types = Some(JsonTypes::new(["null", t.as_str()]));
            Some(normalised)
        }
        _ => {
            warn!(
                "Skipping property '{}': unsupported union alternative {:?}",
                name, first.types
            );
            None
        }
    }
}

fn collect_columns(
    schema: &PropertySchema,
    parent_path: &[String],
    level: usize,
    max_level: usize,
    items: &mut Vec<FlattenedColumn>,
) {
    let Some(properties) = &schema.properties else {
        return;
    };

    for (name, property) in properties {
        let key = flatten_key(name, parent_path, KEY_SEPARATOR);
        let mut path = parent_path.to_vec();
        path.push(name.clone());

        if property.types.is_some() {
            if property.is_nested_object() && level < max_level {
                collect_columns(property, &path, level + 1, max_level, items);
            } else {
                items.push(FlattenedColumn::new(key, path, property.clone()));
            }
        } else if property.any_of.is_some() {
            if let Some(normalised) = normalise_union(name, property) {
                items.push(FlattenedColumn::new(key, path, normalised));
            }
        } else {
            items.push(FlattenedColumn::new(key, path, property.clone()));
        }
    }
}

/// Flatten a JSON schema into an ordered column set
///
/// Object properties with nested properties are descended into while the
/// depth is below `max_level`. Two properties producing the same column
/// name (case-insensitively) fail with [`LoaderError::SchemaConflict`].
///
/// # Arguments
///
/// * `schema` - Root schema carrying `properties`
/// * `max_level` - Flattening depth limit, 0 keeps every object as one column
pub fn flatten_schema(schema: &PropertySchema, max_level: usize) -> LoaderResult<FlattenedSchema> {
    let mut columns = Vec::new();
    collect_columns(schema, &[], 0, max_level, &mut columns);

    columns.sort_by(|a, b| a.name.cmp(&b.name));

    let mut seen = HashSet::new();
    for column in &columns {
        if !seen.insert(column.warehouse_name()) {
            return Err(LoaderError::SchemaConflict(column.name.clone()));
        }

        let length = column.name.chars().count();
        if length > MAX_COLUMN_NAME_LENGTH {
            return Err(LoaderError::ColumnNameTooLong {
                name: column.name.clone(),
                length,
            });
        }
    }

    debug!("Flattened schema into {} columns", columns.len());
    Ok(FlattenedSchema { columns })
}
