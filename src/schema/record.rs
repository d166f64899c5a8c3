//! Record flattening and staging serialisation

use serde_json::{Map, Value};
use tracing::error;

use super::flatten::{FlattenedSchema, KEY_SEPARATOR, flatten_key};
use super::types::ColumnType;
use crate::error::{LoaderError, LoaderResult};

/// Flat column name to scalar value mapping for one record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlattenedRecord {
    values: Map<String, Value>,
}

impl FlattenedRecord {
    /// Value for a flattened key
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values keyed by flattened key, source casing
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Values keyed by the upper-cased column names the warehouse stores
    pub fn to_warehouse_columns(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.to_uppercase(), v.clone()))
            .collect()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.values
    }
}

fn should_serialize(key: &str, value: &Value, schema: &FlattenedSchema) -> bool {
    if value.is_object() || value.is_array() {
        return true;
    }

    schema
        .get(key)
        .is_some_and(|column| column.column_type == ColumnType::Variant && !value.is_null())
}

fn collect_values(
    record: &Map<String, Value>,
    schema: &FlattenedSchema,
    parent_path: &[String],
    level: usize,
    max_level: usize,
    items: &mut Map<String, Value>,
) {
    for (name, value) in record {
        let key = flatten_key(name, parent_path, KEY_SEPARATOR);

        match value {
            Value::Object(nested) if level < max_level => {
                let mut path = parent_path.to_vec();
                path.push(name.clone());
                collect_values(nested, schema, &path, level + 1, max_level, items);
            }
            _ => {
                let flat = if should_serialize(&key, value, schema) {
                    Value::String(value.to_string())
                } else {
                    value.clone()
                };
                items.insert(key, flat);
            }
        }
    }
}

/// Flatten a record the same way its schema was flattened
///
/// Nested objects are descended into up to `max_level`. Values that are
/// still structured, or that land in a semi-structured column, are
/// serialised to their JSON text.
pub fn flatten_record(
    record: &Map<String, Value>,
    schema: &FlattenedSchema,
    max_level: usize,
) -> FlattenedRecord {
    let mut values = Map::new();
    collect_values(record, schema, &[], 0, max_level, &mut values);
    FlattenedRecord { values }
}

/// Render a flattened record as one staged CSV line in column order
///
/// Each present cell is JSON encoded; null, empty strings and absent values
/// become empty cells.
pub fn record_to_csv_line(record: &FlattenedRecord, schema: &FlattenedSchema) -> String {
    schema
        .iter()
        .map(|column| match record.get(&column.name) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) if s.is_empty() => String::new(),
            Some(value) => value.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Comma-joined primary key values of a flattened record
///
/// Returns `Ok(None)` when the stream declares no key properties.
pub fn record_primary_key_string(
    record: &FlattenedRecord,
    key_properties: &[String],
) -> LoaderResult<Option<String>> {
    if key_properties.is_empty() {
        return Ok(None);
    }

    let mut parts = Vec::with_capacity(key_properties.len());
    for key in key_properties {
        match record.get(key) {
            Some(Value::String(s)) => parts.push(s.clone()),
            Some(value) => parts.push(value.to_string()),
            None => {
                error!(
                    "Cannot find {:?} primary key(s) in record: {:?}",
                    key_properties,
                    record.values()
                );
                return Err(LoaderError::MissingPrimaryKey {
                    keys: key_properties.to_vec(),
                });
            }
        }
    }

    Ok(Some(parts.join(",")))
}
