//! Type System - declared type strings to structural descriptors
//!
//! Grammar (aliases in parentheses):
//!
//! ```text
//! type   := scalar | list | dict | object | NAME
//! scalar := str (string) | int (integer) | float (number) | bool (boolean)
//! list   := list[type]                      (array[type])
//! dict   := dict[scalar, type]              (map[scalar, type])
//! object := object{field, ...}              field := NAME ['?'] ':' type
//! ```
//!
//! A bare `object` is only valid where the declaration carries its own
//! `fields:` list. `NAME` refers to a type declared under `types:`.
//!
//! `Display` renders the canonical form; parsing a canonical string yields
//! the same descriptor (defaults and descriptions are not part of it).

use std::fmt;

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::util::closest_match;

/// Scalar keywords in canonical order (used for suggestions)
const KEYWORDS: &[&str] = &[
    "str", "string", "int", "integer", "float", "number", "bool", "boolean", "list", "array",
    "dict", "map", "object",
];

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    suggestion
        .as_deref()
        .map(|s| format!(" (did you mean '{}'?)", s))
        .unwrap_or_default()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TypeParseError {
    #[error("Empty type string")]
    Empty,

    #[error("Unknown type '{name}' in '{text}'{}", suggestion_suffix(.suggestion))]
    UnknownType {
        name: String,
        text: String,
        suggestion: Option<String>,
    },

    #[error("Expected {expected} at position {position} in '{text}'")]
    Expected {
        expected: String,
        position: usize,
        text: String,
    },

    #[error("Unexpected '{rest}' after type in '{text}'")]
    TrailingInput { rest: String, text: String },

    #[error("dict keys must be scalar, found '{key}' in '{text}'")]
    NonScalarKey { key: String, text: String },

    #[error("'object' needs a field list: use object{{name:type}} or declare fields")]
    BareObject,

    #[error("Duplicate field '{field}' in '{text}'")]
    DuplicateField { field: String, text: String },

    #[error("Named type '{name}' is recursive: {cycle}")]
    Cycle { name: String, cycle: String },
}

impl TypeParseError {
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::UnknownType { suggestion, .. } => suggestion.as_deref(),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Descriptors
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    String,
    Int,
    Float,
    Bool,
}

impl ScalarKind {
    /// Canonical keyword
    pub fn keyword(self) -> &'static str {
        match self {
            ScalarKind::String => "str",
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Bool => "bool",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "str" | "string" => Some(ScalarKind::String),
            "int" | "integer" => Some(ScalarKind::Int),
            "float" | "number" => Some(ScalarKind::Float),
            "bool" | "boolean" => Some(ScalarKind::Bool),
            _ => None,
        }
    }
}

/// One field of an `Object` descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectField {
    pub name: String,
    pub ty: TypeDescriptor,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl ObjectField {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor, required: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            required,
            default: None,
            description: None,
        }
    }
}

/// Structural representation of a declared type
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    Scalar(ScalarKind),
    List(Box<TypeDescriptor>),
    Map {
        key: ScalarKind,
        value: Box<TypeDescriptor>,
    },
    Object(Vec<ObjectField>),
}

impl TypeDescriptor {
    pub fn string() -> Self {
        Self::Scalar(ScalarKind::String)
    }

    pub fn list(item: TypeDescriptor) -> Self {
        Self::List(Box::new(item))
    }

    pub fn map(key: ScalarKind, value: TypeDescriptor) -> Self {
        Self::Map {
            key,
            value: Box::new(value),
        }
    }

    /// Short kind name for messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar(kind) => kind.keyword(),
            Self::List(_) => "list",
            Self::Map { .. } => "dict",
            Self::Object(_) => "object",
        }
    }

    pub fn fields(&self) -> Option<&[ObjectField]> {
        match self {
            Self::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Type reached by one step of a dotted path.
    ///
    /// Objects take a field name, dicts any key, lists a numeric index.
    pub fn member(&self, segment: &str) -> Option<&TypeDescriptor> {
        match self {
            Self::Object(fields) => fields.iter().find(|f| f.name == segment).map(|f| &f.ty),
            Self::Map { value, .. } => Some(value),
            Self::List(item) => segment.parse::<usize>().ok().map(|_| item.as_ref()),
            Self::Scalar(_) => None,
        }
    }

    /// Field names reachable from this type (suggestion candidates)
    pub fn member_names(&self) -> Vec<&str> {
        match self {
            Self::Object(fields) => fields.iter().map(|f| f.name.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Can a value of `self` be stored in a slot declared as `target`?
    ///
    /// Identical types, `int -> float` widening, element-wise for list/dict,
    /// field-wise for objects. No implicit stringification.
    pub fn is_assignable_to(&self, target: &TypeDescriptor) -> bool {
        match (self, target) {
            (Self::Scalar(a), Self::Scalar(b)) => {
                a == b || (*a == ScalarKind::Int && *b == ScalarKind::Float)
            }
            (Self::List(a), Self::List(b)) => a.is_assignable_to(b),
            (Self::Map { key: k1, value: v1 }, Self::Map { key: k2, value: v2 }) => {
                k1 == k2 && v1.is_assignable_to(v2)
            }
            (Self::Object(from), Self::Object(to)) => {
                from.len() == to.len()
                    && from.iter().all(|f| {
                        to.iter()
                            .find(|t| t.name == f.name)
                            .is_some_and(|t| f.ty.is_assignable_to(&t.ty))
                    })
            }
            _ => false,
        }
    }

    /// True when the type contains a dict anywhere (no fixed property set)
    pub fn contains_map(&self) -> bool {
        match self {
            Self::Scalar(_) => false,
            Self::List(item) => item.contains_map(),
            Self::Map { .. } => true,
            Self::Object(fields) => fields.iter().any(|f| f.ty.contains_map()),
        }
    }

    /// JSON Schema for structured-output requests.
    ///
    /// Objects list every field as required and forbid extra properties.
    pub fn json_schema(&self) -> Value {
        match self {
            Self::Scalar(ScalarKind::String) => json!({"type": "string"}),
            Self::Scalar(ScalarKind::Int) => json!({"type": "integer"}),
            Self::Scalar(ScalarKind::Float) => json!({"type": "number"}),
            Self::Scalar(ScalarKind::Bool) => json!({"type": "boolean"}),
            Self::List(item) => json!({"type": "array", "items": item.json_schema()}),
            Self::Map { value, .. } => {
                json!({"type": "object", "additionalProperties": value.json_schema()})
            }
            Self::Object(fields) => {
                let mut properties = Map::new();
                for field in fields {
                    let mut schema = field.ty.json_schema();
                    if let (Some(desc), Some(obj)) = (&field.description, schema.as_object_mut()) {
                        obj.insert("description".to_string(), Value::String(desc.clone()));
                    }
                    properties.insert(field.name.clone(), schema);
                }
                let required: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                    "additionalProperties": false,
                })
            }
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(kind) => f.write_str(kind.keyword()),
            Self::List(item) => write!(f, "list[{}]", item),
            Self::Map { key, value } => write!(f, "dict[{},{}]", key.keyword(), value),
            Self::Object(fields) => {
                f.write_str("object{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    let marker = if field.required { "" } else { "?" };
                    write!(f, "{}{}:{}", field.name, marker, field.ty)?;
                }
                f.write_str("}")
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Native representation
// ═══════════════════════════════════════════════════════════════

/// Runtime representation of a declared type.
///
/// Records, validators and providers all go through this mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeType {
    Text,
    Integer,
    Float,
    Boolean,
    Sequence(Box<NativeType>),
    Mapping {
        key: Box<NativeType>,
        value: Box<NativeType>,
    },
    Record(Vec<NativeField>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeField {
    pub name: String,
    pub ty: NativeType,
    pub required: bool,
}

/// Map a descriptor to its native representation
pub fn to_native_type(descriptor: &TypeDescriptor) -> NativeType {
    match descriptor {
        TypeDescriptor::Scalar(kind) => scalar_native(*kind),
        TypeDescriptor::List(item) => NativeType::Sequence(Box::new(to_native_type(item))),
        TypeDescriptor::Map { key, value } => NativeType::Mapping {
            key: Box::new(scalar_native(*key)),
            value: Box::new(to_native_type(value)),
        },
        TypeDescriptor::Object(fields) => NativeType::Record(
            fields
                .iter()
                .map(|f| NativeField {
                    name: f.name.clone(),
                    ty: to_native_type(&f.ty),
                    required: f.required,
                })
                .collect(),
        ),
    }
}

fn scalar_native(kind: ScalarKind) -> NativeType {
    match kind {
        ScalarKind::String => NativeType::Text,
        ScalarKind::Int => NativeType::Integer,
        ScalarKind::Float => NativeType::Float,
        ScalarKind::Bool => NativeType::Boolean,
    }
}

impl NativeType {
    /// Rust spelling of the representation (debug output, docs)
    pub fn rust_name(&self) -> String {
        match self {
            Self::Text => "String".to_string(),
            Self::Integer => "i64".to_string(),
            Self::Float => "f64".to_string(),
            Self::Boolean => "bool".to_string(),
            Self::Sequence(item) => format!("Vec<{}>", item.rust_name()),
            Self::Mapping { key, value } => {
                format!("BTreeMap<{}, {}>", key.rust_name(), value.rust_name())
            }
            Self::Record(_) => "Record".to_string(),
        }
    }

    /// Value an optional field takes when nothing was supplied
    pub fn empty_value(&self) -> Value {
        match self {
            Self::Text => Value::String(String::new()),
            Self::Integer => json!(0),
            Self::Float => json!(0.0),
            Self::Boolean => Value::Bool(false),
            Self::Sequence(_) => Value::Array(Vec::new()),
            Self::Mapping { .. } => Value::Object(Map::new()),
            Self::Record(fields) => Value::Object(
                fields
                    .iter()
                    .map(|f| (f.name.clone(), f.ty.empty_value()))
                    .collect(),
            ),
        }
    }

    /// Structural check of a JSON value against this representation
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Text => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Sequence(item) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|v| item.accepts(v))),
            Self::Mapping { key, value: val } => value.as_object().is_some_and(|entries| {
                entries
                    .iter()
                    .all(|(k, v)| key.accepts_key(k) && val.accepts(v))
            }),
            Self::Record(fields) => value.as_object().is_some_and(|entries| {
                fields.iter().all(|f| match entries.get(&f.name) {
                    Some(v) => f.ty.accepts(v),
                    None => !f.required,
                })
            }),
        }
    }

    /// JSON object keys are strings; scalar keys must parse as the key type
    fn accepts_key(&self, key: &str) -> bool {
        match self {
            Self::Text => true,
            Self::Integer => key.parse::<i64>().is_ok(),
            Self::Float => key.parse::<f64>().is_ok(),
            Self::Boolean => key == "true" || key == "false",
            _ => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Parser
// ═══════════════════════════════════════════════════════════════

/// Resolves names that are not type keywords (`types:` declarations)
pub trait TypeEnv {
    fn named(&mut self, name: &str) -> Result<Option<TypeDescriptor>, TypeParseError>;

    /// Declared names, for suggestions
    fn names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Environment without named types
pub struct NoNamedTypes;

impl TypeEnv for NoNamedTypes {
    fn named(&mut self, _name: &str) -> Result<Option<TypeDescriptor>, TypeParseError> {
        Ok(None)
    }
}

/// Parse a type string with no named types in scope
pub fn parse_type(text: &str) -> Result<TypeDescriptor, TypeParseError> {
    parse_type_in(text, None, &mut NoNamedTypes)
}

/// Parse a type string.
///
/// `bare_object` supplies the fields for a bare `object` keyword (from a
/// declaration's `fields:` list); `env` resolves named types.
pub fn parse_type_in(
    text: &str,
    bare_object: Option<&[ObjectField]>,
    env: &mut dyn TypeEnv,
) -> Result<TypeDescriptor, TypeParseError> {
    if text.trim().is_empty() {
        return Err(TypeParseError::Empty);
    }

    let mut parser = Parser {
        text,
        bytes: text.as_bytes(),
        pos: 0,
        bare_object,
        env,
    };
    let descriptor = parser.parse()?;
    parser.skip_ws();
    if parser.pos < parser.bytes.len() {
        return Err(TypeParseError::TrailingInput {
            rest: text[parser.pos..].to_string(),
            text: text.to_string(),
        });
    }
    Ok(descriptor)
}

struct Parser<'a, 'e> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    bare_object: Option<&'a [ObjectField]>,
    env: &'e mut dyn TypeEnv,
}

impl<'a> Parser<'a, '_> {
    fn parse(&mut self) -> Result<TypeDescriptor, TypeParseError> {
        self.skip_ws();
        let word = self.ident("a type name")?;

        if let Some(kind) = ScalarKind::from_keyword(word) {
            return Ok(TypeDescriptor::Scalar(kind));
        }

        match word {
            "list" | "array" => {
                self.expect(b'[')?;
                let item = self.parse()?;
                self.expect(b']')?;
                Ok(TypeDescriptor::list(item))
            }
            "dict" | "map" => {
                self.expect(b'[')?;
                let key = self.parse()?;
                let key = match key {
                    TypeDescriptor::Scalar(kind) => kind,
                    other => {
                        return Err(TypeParseError::NonScalarKey {
                            key: other.to_string(),
                            text: self.text.to_string(),
                        })
                    }
                };
                self.expect(b',')?;
                let value = self.parse()?;
                self.expect(b']')?;
                Ok(TypeDescriptor::map(key, value))
            }
            "object" => {
                self.skip_ws();
                if self.peek() == Some(b'{') {
                    self.pos += 1;
                    self.object_fields()
                } else {
                    self.bare_object
                        .map(|fields| TypeDescriptor::Object(fields.to_vec()))
                        .ok_or(TypeParseError::BareObject)
                }
            }
            name => match self.env.named(name)? {
                Some(descriptor) => Ok(descriptor),
                None => {
                    let names = self.env.names();
                    let candidates = KEYWORDS
                        .iter()
                        .copied()
                        .chain(names.iter().map(String::as_str));
                    Err(TypeParseError::UnknownType {
                        name: name.to_string(),
                        text: self.text.to_string(),
                        suggestion: closest_match(name, candidates),
                    })
                }
            },
        }
    }

    /// Fields after `object{`, through the closing brace
    fn object_fields(&mut self) -> Result<TypeDescriptor, TypeParseError> {
        let mut fields: Vec<ObjectField> = Vec::new();

        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(TypeDescriptor::Object(fields));
        }

        loop {
            self.skip_ws();
            let name = self.ident("a field name")?.to_string();
            self.skip_ws();
            let required = if self.peek() == Some(b'?') {
                self.pos += 1;
                false
            } else {
                true
            };
            self.expect(b':')?;
            let ty = self.parse()?;

            if fields.iter().any(|f| f.name == name) {
                return Err(TypeParseError::DuplicateField {
                    field: name,
                    text: self.text.to_string(),
                });
            }
            fields.push(ObjectField::new(name, ty, required));

            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(TypeDescriptor::Object(fields));
                }
                _ => return Err(self.expected("',' or '}'")),
            }
        }
    }

    fn ident(&mut self, what: &str) -> Result<&'a str, TypeParseError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            let ok = if self.pos == start {
                b.is_ascii_alphabetic() || b == b'_'
            } else {
                b.is_ascii_alphanumeric() || b == b'_'
            };
            if !ok {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.expected(what));
        }
        let text: &'a str = self.text;
        Ok(&text[start..self.pos])
    }

    fn expect(&mut self, byte: u8) -> Result<(), TypeParseError> {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.expected(&format!("'{}'", byte as char)))
        }
    }

    fn expected(&self, what: &str) -> TypeParseError {
        TypeParseError::Expected {
            expected: what.to_string(),
            position: self.pos,
            text: self.text.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }
}
