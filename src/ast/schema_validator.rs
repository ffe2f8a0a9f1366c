//! Structural document check
//!
//! Validates the raw document (YAML or JSON, as a JSON value) against the
//! embedded workflow JSON Schema before serde builds the typed model, so
//! every structural problem is reported with its JSON pointer at once.

use std::sync::OnceLock;

use jsonschema::Validator;
use serde_json::Value;

use crate::error::FlowlineError;

/// Embedded schema JSON (compiled at build time)
const SCHEMA_JSON: &str = include_str!("../../schemas/flowline-workflow.schema.json");

/// Global schema validator instance (lazy initialization)
static VALIDATOR: OnceLock<Result<Validator, String>> = OnceLock::new();

pub struct WorkflowSchemaValidator {
    validator: &'static Validator,
}

impl WorkflowSchemaValidator {
    /// Uses a cached global validator.
    pub fn new() -> Result<Self, FlowlineError> {
        let validator_result = VALIDATOR.get_or_init(|| {
            let schema: Value = serde_json::from_str(SCHEMA_JSON)
                .map_err(|e| format!("Failed to parse schema JSON: {}", e))?;
            Validator::new(&schema).map_err(|e| format!("Failed to compile schema: {}", e))
        });

        match validator_result {
            Ok(validator) => Ok(Self { validator }),
            Err(e) => Err(FlowlineError::ConfigError { reason: e.clone() }),
        }
    }

    pub fn validate_yaml(&self, yaml: &str) -> Result<(), FlowlineError> {
        let value: Value = serde_yaml::from_str(yaml)?;
        self.validate_value(&value)
    }

    /// Every schema violation, or `SchemaValidationFailed`
    pub fn validate_value(&self, value: &Value) -> Result<(), FlowlineError> {
        let errors: Vec<SchemaError> = self
            .validator
            .iter_errors(value)
            .map(|e| SchemaError {
                path: display_path(&e.instance_path.to_string()),
                message: e.to_string(),
                kind: classify_error(&e),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FlowlineError::SchemaValidationFailed { errors })
        }
    }
}

fn display_path(pointer: &str) -> String {
    if pointer.is_empty() {
        "/".to_string()
    } else {
        pointer.to_string()
    }
}

/// Schema validation error details
#[derive(Debug, Clone)]
pub struct SchemaError {
    /// JSON pointer to the offending value (e.g. "/nodes/0/outputs")
    pub path: String,
    pub message: String,
    pub kind: SchemaErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaErrorKind {
    MissingRequired { field: String },
    UnknownField { field: String },
    TypeMismatch { expected: String },
    InvalidEnum { value: String },
    Other,
}

fn classify_error(error: &jsonschema::ValidationError) -> SchemaErrorKind {
    let kind = format!("{:?}", error.kind);
    let message = error.to_string();

    if kind.starts_with("Required") {
        let field = extract_quoted(&message).unwrap_or_else(|| "unknown".to_string());
        SchemaErrorKind::MissingRequired { field }
    } else if kind.starts_with("AdditionalProperties") {
        let field = extract_quoted(&message).unwrap_or_else(|| "unknown".to_string());
        SchemaErrorKind::UnknownField { field }
    } else if kind.starts_with("Type") {
        SchemaErrorKind::TypeMismatch {
            expected: extract_type(&message).unwrap_or_else(|| "unknown".to_string()),
        }
    } else if kind.starts_with("Enum") {
        SchemaErrorKind::InvalidEnum {
            value: error.instance.to_string(),
        }
    } else {
        SchemaErrorKind::Other
    }
}

/// First quoted token in a message (`"name"` or `'name'`)
fn extract_quoted(msg: &str) -> Option<String> {
    for quote in ['"', '\''] {
        if let Some(start) = msg.find(quote) {
            if let Some(end) = msg[start + 1..].find(quote) {
                return Some(msg[start + 1..start + 1 + end].to_string());
            }
        }
    }
    None
}

fn extract_type(msg: &str) -> Option<String> {
    ["string", "integer", "number", "boolean", "array", "object"]
        .into_iter()
        .find(|t| msg.contains(t))
        .map(str::to_string)
}
