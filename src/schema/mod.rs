//! Schema handling: type mapping, flattening and record serialisation

pub mod flatten;
pub mod record;
pub mod types;

pub use flatten::{
    FlattenedColumn, FlattenedSchema, KEY_SEPARATOR, MAX_COLUMN_NAME_LENGTH, flatten_key,
    flatten_schema,
};
pub use record::{FlattenedRecord, flatten_record, record_primary_key_string, record_to_csv_line};
pub use types::{ColumnType, JsonTypes, LoadTransform, PropertySchema, TypeMapper};
