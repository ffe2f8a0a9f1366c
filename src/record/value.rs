//! Record instances
//!
//! A `Record` is only produced by `RecordSchema::construct`, so its values
//! always satisfy the schema. Updates return a new record.

use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use super::{RecordBuildError, RecordSchema};

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Arc<RecordSchema>,
    values: Map<String, Value>,
}

impl Record {
    pub(crate) fn from_parts(schema: Arc<RecordSchema>, values: Map<String, Value>) -> Self {
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Dotted lookup (`report.sources.0.url`)
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = self.values.get(segments.next()?)?;
        segments.try_fold(first, |value, segment| step_into(value, segment))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// New record with `updates` applied; `self` is left untouched
    pub fn with_fields_replaced(
        &self,
        updates: Map<String, Value>,
    ) -> Result<Record, RecordBuildError> {
        let mut values = self.values.clone();
        for (name, value) in updates {
            let field = self
                .schema
                .field(&name)
                .ok_or_else(|| RecordBuildError::UnknownField {
                    record: self.schema.name().to_string(),
                    path: name.clone(),
                })?;
            let value = match value {
                Value::Null if !field.required => field.default.clone().unwrap_or(Value::Null),
                other => field.shape.normalize(other, &name)?,
            };
            values.insert(name, value);
        }
        Ok(Record {
            schema: Arc::clone(&self.schema),
            values,
        })
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.values.clone()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

/// One step of a dotted path: object key or array index
pub fn step_into<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}
