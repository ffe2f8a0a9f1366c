//! Dynamic Record Builder
//!
//! Runtime-checked record types synthesized from a declared field list:
//! - `schema`: `RecordSchema` (field shapes, defaults, nested records)
//! - `value`: `Record` (immutable, validated instance)
//!
//! State records honour `required`/`default`; output records require every
//! field, since they describe what a provider must return.

pub mod schema;
pub mod value;

use thiserror::Error;

pub use schema::{build_record_type, pascal_case, RecordField, RecordMode, RecordSchema, Shape};
pub use value::Record;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordBuildError {
    #[error("Field '{path}' is required and cannot declare a default")]
    RequiredWithDefault { path: String },

    #[error("Default for '{path}' does not match {expected}: {reason}")]
    InvalidDefault {
        path: String,
        expected: String,
        reason: String,
    },

    #[error("Duplicate field '{path}'")]
    DuplicateField { path: String },

    #[error("Missing required field '{path}' in {record}")]
    MissingField { record: String, path: String },

    #[error("Field '{path}' expects {expected}, got {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("Unknown field '{path}' for {record}")]
    UnknownField { record: String, path: String },
}

impl RecordBuildError {
    /// Dotted path of the offending field
    pub fn path(&self) -> &str {
        match self {
            Self::RequiredWithDefault { path }
            | Self::InvalidDefault { path, .. }
            | Self::DuplicateField { path }
            | Self::MissingField { path, .. }
            | Self::TypeMismatch { path, .. }
            | Self::UnknownField { path, .. } => path,
        }
    }
}

/// JSON kind name for mismatch messages
pub(crate) fn json_kind(value: &serde_json::Value) -> String {
    use serde_json::Value;
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Number(n) if n.is_f64() => "float".to_string(),
        Value::Number(_) => "int".to_string(),
        Value::String(_) => "str".to_string(),
        Value::Array(_) => "list".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}
