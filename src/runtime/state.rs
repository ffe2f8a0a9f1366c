//! Runtime state - the single record threaded through a run
//!
//! A `RuntimeState` is never mutated: applying a step's outputs yields a new
//! state and leaves the previous one intact.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::ast::NativeType;
use crate::error::{FlowlineError, Result};
use crate::record::{Record, RecordSchema};
use crate::util::closest_match;

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeState {
    record: Record,
}

impl RuntimeState {
    /// Initial state from caller inputs plus declared defaults
    ///
    /// Keys the schema does not declare are dropped with a warning.
    pub fn initialize(schema: &Arc<RecordSchema>, mut inputs: Map<String, Value>) -> Result<Self> {
        let unknown: Vec<String> = inputs
            .keys()
            .filter(|k| schema.field(k).is_none())
            .cloned()
            .collect();
        for key in unknown {
            let hint = closest_match(&key, schema.field_names());
            warn!(input = %key, suggestion = ?hint, "ignoring input that is not a state field");
            inputs.remove(&key);
        }

        let missing = schema.missing_required(&inputs);
        if !missing.is_empty() {
            return Err(FlowlineError::StateInitialization { missing });
        }

        Ok(Self {
            record: schema.construct(inputs)?,
        })
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.record.get(name)
    }

    pub fn get_path(&self, path: &str) -> Option<&Value> {
        self.record.get_path(path)
    }

    /// New state with the named fields of `output` written over this one
    pub fn with_outputs(&self, output: &Record, names: &[String]) -> Result<Self> {
        let mut updates = Map::with_capacity(names.len());
        for name in names {
            let value = output.get(name).cloned().unwrap_or(Value::Null);
            updates.insert(name.clone(), value);
        }
        Ok(Self {
            record: self.record.with_fields_replaced(updates)?,
        })
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.record.to_map()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.record.into_map()
    }
}

/// Split a `name=value` command-line argument
pub fn parse_input_pair(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(FlowlineError::InvalidInput {
            raw: raw.to_string(),
            reason: "expected name=value".to_string(),
        }),
    }
}

/// Turn raw text inputs into typed values for `schema`
///
/// `str` fields take the text as-is; every other type is parsed as JSON.
/// Unknown names pass through untouched and are dropped by `initialize`.
pub fn coerce_inputs(
    schema: &RecordSchema,
    pairs: &[(String, String)],
) -> Result<Map<String, Value>> {
    let mut out = Map::with_capacity(pairs.len());
    for (name, raw) in pairs {
        let value = match schema.field(name) {
            Some(field) if field.native != NativeType::Text => {
                serde_json::from_str(raw).map_err(|e| FlowlineError::InvalidInput {
                    raw: format!("{}={}", name, raw),
                    reason: format!("expected {} ({})", field.shape.describe(), e),
                })?
            }
            _ => Value::String(raw.clone()),
        };
        out.insert(name.clone(), value);
    }
    Ok(out)
}
