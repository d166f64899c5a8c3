//! JSON schema property descriptors and the warehouse type mapping

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// JSON schema `type` keyword, normalised to a list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TypeKeyword", into = "Vec<String>")]
pub struct JsonTypes(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum TypeKeyword {
    One(String),
    Many(Vec<String>),
}

impl From<TypeKeyword> for JsonTypes {
    fn from(keyword: TypeKeyword) -> Self {
        match keyword {
            TypeKeyword::One(t) => JsonTypes(vec![t]),
            TypeKeyword::Many(ts) => JsonTypes(ts),
        }
    }
}

impl From<JsonTypes> for Vec<String> {
    fn from(types: JsonTypes) -> Self {
        types.0
    }
}

impl JsonTypes {
    /// Build from a list of type names
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        JsonTypes(types.into_iter().map(Into::into).collect())
    }

    /// Whether `name` is one of the declared types
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|t| t == name)
    }

    /// Declared type names in source order
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Whether no type was declared
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A single (possibly nested) JSON schema property
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// Declared type(s); absent for union constructs
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub types: Option<JsonTypes>,
    /// Optional format hint (e.g. "date-time")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Nested properties of an object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, PropertySchema>>,
    /// Union alternatives
    #[serde(rename = "anyOf", default, skip_serializing_if = "Option::is_none")]
    pub any_of: Option<Vec<PropertySchema>>,
}

impl PropertySchema {
    /// Property with the given type list and no format
    pub fn of_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: Some(JsonTypes::new(types)),
            ..Default::default()
        }
    }

    /// Attach a format hint
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Attach nested properties
    pub fn with_properties(mut self, properties: BTreeMap<String, PropertySchema>) -> Self {
        self.properties = Some(properties);
        self
    }

    fn has_type(&self, name: &str) -> bool {
        self.types.as_ref().is_some_and(|t| t.contains(name))
    }

    /// Whether this property is an object carrying nested properties
    pub fn is_nested_object(&self) -> bool {
        self.has_type("object") && self.properties.as_ref().is_some_and(|p| !p.is_empty())
    }
}

/// Target column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Variant,
    TimestampNtz,
    Time,
    Binary,
    Float,
    Text,
    Number,
    Boolean,
}

impl ColumnType {
    /// Type name as used in DDL
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Variant => "variant",
            ColumnType::TimestampNtz => "timestamp_ntz",
            ColumnType::Time => "time",
            ColumnType::Binary => "binary",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::Number => "number",
            ColumnType::Boolean => "boolean",
        }
    }

    /// Whether a live catalog type name denotes this type
    ///
    /// Catalog names are compared case-insensitively.
    pub fn matches_catalog_type(&self, data_type: &str) -> bool {
        data_type.eq_ignore_ascii_case(self.sql_name())
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_name())
    }
}

/// Load-time conversion applied to a staged text cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadTransform {
    /// Parse a JSON literal into a semi-structured value
    ParseJson,
    /// Decode textual binary
    ToBinary,
}

impl LoadTransform {
    /// SQL function name
    pub fn sql_function(&self) -> &'static str {
        match self {
            LoadTransform::ParseJson => "parse_json",
            LoadTransform::ToBinary => "to_binary",
        }
    }
}

/// Maps JSON schema properties to column types and load transforms
pub struct TypeMapper;

impl TypeMapper {
    /// Column type for a property, first matching rule wins
    pub fn column_type(property: &PropertySchema) -> ColumnType {
        let format = property.format.as_deref();

        if property.has_type("object") || property.has_type("array") {
            ColumnType::Variant
        } else if format == Some("date-time") {
            ColumnType::TimestampNtz
        } else if format == Some("time") {
            ColumnType::Time
        } else if format == Some("binary") {
            ColumnType::Binary
        } else if property.has_type("number") {
            ColumnType::Float
        } else if property.has_type("integer") && property.has_type("string") {
            ColumnType::Text
        } else if property.has_type("integer") {
            ColumnType::Number
        } else if property.has_type("boolean") {
            ColumnType::Boolean
        } else {
            ColumnType::Text
        }
    }

    /// Load transform required for a property, if any
    pub fn column_transform(property: &PropertySchema) -> Option<LoadTransform> {
        if property.has_type("object") || property.has_type("array") {
            Some(LoadTransform::ParseJson)
        } else if property.format.as_deref() == Some("binary") {
            Some(LoadTransform::ToBinary)
        } else {
            None
        }
    }
}
