//! Record schemas built from declared fields
//!
//! Nested object fields get their own `RecordSchema`, named from the parent
//! name plus the PascalCase field name (`State` + `report` → `StateReport`,
//! list items add `Item`, dict values add `Value`).

use std::sync::Arc;

use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::ast::{to_native_type, NativeType, ObjectField, ScalarKind, TypeDescriptor};

use super::{json_kind, Record, RecordBuildError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    /// `required` and `default` apply as declared
    State,
    /// Every field is required
    Output,
}

/// How a value is checked and normalized on construction
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Leaf(NativeType),
    List(Box<Shape>),
    Map { key: ScalarKind, value: Box<Shape> },
    Record(Arc<RecordSchema>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordField {
    pub name: String,
    pub descriptor: TypeDescriptor,
    pub native: NativeType,
    pub shape: Shape,
    pub required: bool,
    /// Value taken when an optional field is omitted
    pub default: Option<Value>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    name: String,
    mode: RecordMode,
    fields: Vec<RecordField>,
}

/// Build a record type from declared fields
pub fn build_record_type(
    fields: &[ObjectField],
    name_hint: &str,
    mode: RecordMode,
) -> Result<Arc<RecordSchema>, RecordBuildError> {
    build_at(fields, name_hint, mode, "")
}

fn build_at(
    fields: &[ObjectField],
    name: &str,
    mode: RecordMode,
    prefix: &str,
) -> Result<Arc<RecordSchema>, RecordBuildError> {
    let mut built: Vec<RecordField> = Vec::with_capacity(fields.len());

    for field in fields {
        let path = join_path(prefix, &field.name);
        if built.iter().any(|f| f.name == field.name) {
            return Err(RecordBuildError::DuplicateField { path });
        }

        let nested_name = format!("{}{}", name, pascal_case(&field.name));
        let shape = shape_of(&field.ty, &nested_name, mode, &path)?;

        let required = mode == RecordMode::Output || field.required;
        let default = if required {
            if mode == RecordMode::State && field.default.is_some() {
                return Err(RecordBuildError::RequiredWithDefault { path });
            }
            None
        } else {
            Some(match &field.default {
                Some(value) => shape.normalize(value.clone(), &path).map_err(|e| {
                    RecordBuildError::InvalidDefault {
                        path: path.clone(),
                        expected: field.ty.to_string(),
                        reason: e.to_string(),
                    }
                })?,
                None => shape.empty_value(),
            })
        };

        built.push(RecordField {
            name: field.name.clone(),
            descriptor: field.ty.clone(),
            native: to_native_type(&field.ty),
            shape,
            required,
            default,
            description: field.description.clone(),
        });
    }

    Ok(Arc::new(RecordSchema {
        name: name.to_string(),
        mode,
        fields: built,
    }))
}

fn shape_of(
    ty: &TypeDescriptor,
    name: &str,
    mode: RecordMode,
    path: &str,
) -> Result<Shape, RecordBuildError> {
    Ok(match ty {
        TypeDescriptor::Scalar(_) => Shape::Leaf(to_native_type(ty)),
        TypeDescriptor::List(item) => Shape::List(Box::new(shape_of(
            item,
            &format!("{}Item", name),
            mode,
            path,
        )?)),
        TypeDescriptor::Map { key, value } => Shape::Map {
            key: *key,
            value: Box::new(shape_of(value, &format!("{}Value", name), mode, path)?),
        },
        TypeDescriptor::Object(fields) => Shape::Record(build_at(fields, name, mode, path)?),
    })
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// `echo_step` → `EchoStep`
pub fn pascal_case(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

impl Shape {
    /// Type as written in messages
    pub fn describe(&self) -> String {
        match self {
            Shape::Leaf(NativeType::Text) => "str".to_string(),
            Shape::Leaf(NativeType::Integer) => "int".to_string(),
            Shape::Leaf(NativeType::Float) => "float".to_string(),
            Shape::Leaf(NativeType::Boolean) => "bool".to_string(),
            Shape::Leaf(other) => other.rust_name(),
            Shape::List(item) => format!("list[{}]", item.describe()),
            Shape::Map { key, value } => format!("dict[{},{}]", key.keyword(), value.describe()),
            Shape::Record(schema) => schema.name().to_string(),
        }
    }

    pub fn empty_value(&self) -> Value {
        match self {
            Shape::Leaf(native) => native.empty_value(),
            Shape::List(_) => Value::Array(Vec::new()),
            Shape::Map { .. } => Value::Object(Map::new()),
            Shape::Record(schema) => schema.empty_value(),
        }
    }

    /// Check `value` and bring it into canonical form.
    ///
    /// Ints stored in float slots become floats; nested records fill their
    /// defaults and drop undeclared keys.
    pub fn normalize(&self, value: Value, path: &str) -> Result<Value, RecordBuildError> {
        match (self, value) {
            (Shape::Leaf(NativeType::Float), Value::Number(n)) => Ok(n
                .as_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Number(n))),
            (Shape::Leaf(native), value) => {
                if native.accepts(&value) {
                    Ok(value)
                } else {
                    Err(self.mismatch(path, &value))
                }
            }
            (Shape::List(item), Value::Array(items)) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| item.normalize(v, &format!("{}.{}", path, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            (Shape::Map { key, value: shape }, Value::Object(entries)) => {
                let mut out = Map::with_capacity(entries.len());
                for (k, v) in entries {
                    let entry_path = format!("{}.{}", path, k);
                    if !key_matches(*key, &k) {
                        return Err(RecordBuildError::TypeMismatch {
                            path: entry_path,
                            expected: format!("{} key", key.keyword()),
                            found: format!("key '{}'", k),
                        });
                    }
                    let v = shape.normalize(v, &entry_path)?;
                    out.insert(k, v);
                }
                Ok(Value::Object(out))
            }
            (Shape::Record(schema), Value::Object(entries)) => {
                schema.normalize_map(entries, path).map(Value::Object)
            }
            (_, value) => Err(self.mismatch(path, &value)),
        }
    }

    fn mismatch(&self, path: &str, value: &Value) -> RecordBuildError {
        RecordBuildError::TypeMismatch {
            path: path.to_string(),
            expected: self.describe(),
            found: json_kind(value),
        }
    }
}

fn key_matches(kind: ScalarKind, key: &str) -> bool {
    match kind {
        ScalarKind::String => true,
        ScalarKind::Int => key.parse::<i64>().is_ok(),
        ScalarKind::Float => key.parse::<f64>().is_ok(),
        ScalarKind::Bool => key == "true" || key == "false",
    }
}

impl RecordSchema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> RecordMode {
        self.mode
    }

    pub fn fields(&self) -> &[RecordField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&RecordField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// The record as an `Object` descriptor
    pub fn descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::Object(
            self.fields
                .iter()
                .map(|f| ObjectField {
                    name: f.name.clone(),
                    ty: f.descriptor.clone(),
                    required: f.required,
                    default: f.default.clone(),
                    description: f.description.clone(),
                })
                .collect(),
        )
    }

    /// JSON Schema handed to structured-output providers
    pub fn json_schema(&self) -> Value {
        self.descriptor().json_schema()
    }

    /// Value of an omitted optional nested record.
    ///
    /// Optional fields take their default, required ones the empty value of
    /// their shape, so paths into the record always resolve.
    fn empty_value(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|f| {
                    let value = f.default.clone().unwrap_or_else(|| f.shape.empty_value());
                    (f.name.clone(), value)
                })
                .collect(),
        )
    }

    /// Required fields absent (or null) in `provided`
    pub fn missing_required(&self, provided: &Map<String, Value>) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .filter(|f| provided.get(&f.name).is_none_or(Value::is_null))
            .map(|f| f.name.clone())
            .collect()
    }

    /// Validate `values` and build an instance
    pub fn construct(self: &Arc<Self>, values: Map<String, Value>) -> Result<Record, RecordBuildError> {
        let values = self.normalize_map(values, "")?;
        Ok(Record::from_parts(Arc::clone(self), values))
    }

    pub(crate) fn normalize_map(
        &self,
        mut input: Map<String, Value>,
        prefix: &str,
    ) -> Result<Map<String, Value>, RecordBuildError> {
        let mut out = Map::with_capacity(self.fields.len());

        for field in &self.fields {
            let path = join_path(prefix, &field.name);
            match input.remove(&field.name) {
                Some(Value::Null) | None if !field.required => {
                    out.insert(
                        field.name.clone(),
                        field.default.clone().unwrap_or(Value::Null),
                    );
                }
                Some(value) => {
                    let value = field.shape.normalize(value, &path)?;
                    out.insert(field.name.clone(), value);
                }
                None => {
                    return Err(RecordBuildError::MissingField {
                        record: self.name.clone(),
                        path,
                    })
                }
            }
        }

        if !input.is_empty() {
            let dropped: Vec<&str> = input.keys().map(String::as_str).collect();
            debug!(record = %self.name, ?dropped, "dropping undeclared keys");
        }

        Ok(out)
    }
}
