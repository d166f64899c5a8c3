//! Warehouse error classification
//!
//! Maps structured warehouse errors onto the few kinds control flow cares
//! about, so callers never match raw error text themselves.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{LoaderError, WarehouseError};

/// What a warehouse error means to the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarehouseErrorKind {
    /// Schema, table or pipe does not exist (or is not visible)
    ObjectDoesNotExist,
    /// Object already exists
    AlreadyExists,
    /// Anything else; propagated to the caller
    Unexpected,
}

/// Classifies warehouse errors
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &WarehouseError) -> WarehouseErrorKind;

    /// Classify a loader error, anything that is not a warehouse error is unexpected
    fn classify_loader_error(&self, error: &LoaderError) -> WarehouseErrorKind {
        match error {
            LoaderError::Warehouse(e) => self.classify(e),
            _ => WarehouseErrorKind::Unexpected,
        }
    }
}

/// Error code for "object does not exist or not authorized"
pub const CODE_OBJECT_NOT_AUTHORIZED: &str = "002003";
/// Error code for "object does not exist" raised by SHOW statements
pub const CODE_OBJECT_DOES_NOT_EXIST: &str = "002043";
/// Error code for "object already exists"
pub const CODE_ALREADY_EXISTS: &str = "002002";

static CODE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{6})\s*\((\w{5})\):").expect("Invalid regex"));

/// Classifier for Snowflake error codes
#[derive(Debug, Clone, Copy, Default)]
pub struct SnowflakeErrorClassifier;

impl SnowflakeErrorClassifier {
    /// Vendor code of an error, falling back to a `NNNNNN (SSSSS):` message prefix
    fn code<'a>(error: &'a WarehouseError) -> Option<&'a str> {
        if let Some(code) = error.code.as_deref() {
            return Some(code);
        }

        CODE_PREFIX
            .captures(&error.message)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

impl ErrorClassifier for SnowflakeErrorClassifier {
    fn classify(&self, error: &WarehouseError) -> WarehouseErrorKind {
        match Self::code(error) {
            Some(CODE_OBJECT_NOT_AUTHORIZED) | Some(CODE_OBJECT_DOES_NOT_EXIST) => {
                WarehouseErrorKind::ObjectDoesNotExist
            }
            Some(CODE_ALREADY_EXISTS) => WarehouseErrorKind::AlreadyExists,
            _ => WarehouseErrorKind::Unexpected,
        }
    }
}
