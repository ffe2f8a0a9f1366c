//! Template Resolution - `{name}` / `{a.b.c}` substitution
//!
//! - Placeholders are identifier paths: `{topic}`, `{report.sources.0.url}`
//! - `{{` and `}}` render a literal `{` and `}`
//! - Any other brace content (`{"json": 1}`, `{ spaced }`) stays literal
//!
//! Lookup order: the step's resolved input mapping (whole name only), then
//! the state record (dotted walk). Resolution is pure: same template, inputs
//! and state always give the same text.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::ast::OrderedMap;
use crate::record::value::step_into;
use crate::record::Record;
use crate::util::closest_match;

/// Identifier path: first segment an identifier, later ones may be indices
static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*$").expect("placeholder regex is valid")
});

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    suggestion
        .as_deref()
        .map(|s| format!(" (did you mean '{{{}}}'?)", s))
        .unwrap_or_default()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error(
        "Unresolved variable '{{{placeholder}}}'{}; available inputs: [{}], state: [{}]",
        suggestion_suffix(.suggestion),
        .available_inputs.join(", "),
        .available_state.join(", ")
    )]
    UnresolvedVariable {
        placeholder: String,
        suggestion: Option<String>,
        available_inputs: Vec<String>,
        available_state: Vec<String>,
    },

    #[error("'{{{placeholder}}}' has no '{segment}'{}; available: [{}]", suggestion_suffix(.suggestion), .available.join(", "))]
    PathNotFound {
        placeholder: String,
        segment: String,
        suggestion: Option<String>,
        available: Vec<String>,
    },

    #[error("Cannot access '{segment}' on a {value_type} value in '{{{placeholder}}}'")]
    InvalidTraversal {
        placeholder: String,
        segment: String,
        value_type: String,
    },
}

impl TemplateError {
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::UnresolvedVariable { suggestion, .. } | Self::PathNotFound { suggestion, .. } => {
                suggestion.as_deref()
            }
            Self::InvalidTraversal { .. } => None,
        }
    }
}

/// Token representing a parsed template fragment
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Literal text (range in the original string)
    Literal(Range<usize>),
    /// `{{` or `}}`
    Escaped(char),
    /// `{path}`
    Var(String),
}

/// Split a template into tokens
pub fn tokenize(template: &str) -> Vec<Token> {
    let bytes = template.as_bytes();
    let mut tokens = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    let flush = |tokens: &mut Vec<Token>, start: usize, end: usize| {
        if end > start {
            tokens.push(Token::Literal(start..end));
        }
    };

    while i < bytes.len() {
        match bytes[i] {
            b'{' | b'}' if bytes.get(i + 1) == Some(&bytes[i]) => {
                flush(&mut tokens, literal_start, i);
                tokens.push(Token::Escaped(bytes[i] as char));
                i += 2;
                literal_start = i;
            }
            b'{' => {
                let var = template[i + 1..]
                    .find('}')
                    .map(|end| (end, &template[i + 1..i + 1 + end]))
                    .filter(|(_, content)| PLACEHOLDER_RE.is_match(content));
                match var {
                    Some((end, content)) => {
                        flush(&mut tokens, literal_start, i);
                        tokens.push(Token::Var(content.to_string()));
                        i += end + 2;
                        literal_start = i;
                    }
                    None => i += 1,
                }
            }
            _ => i += 1,
        }
    }
    flush(&mut tokens, literal_start, bytes.len());

    tokens
}

/// Placeholder paths in order of appearance
pub fn extract_placeholders(template: &str) -> Vec<String> {
    tokenize(template)
        .into_iter()
        .filter_map(|t| match t {
            Token::Var(path) => Some(path),
            _ => None,
        })
        .collect()
}

/// Resolve a template against resolved inputs and the state record
pub fn resolve(
    template: &str,
    inputs: &BTreeMap<String, String>,
    state: &Record,
) -> Result<String, TemplateError> {
    render(template, &tokenize(template), inputs, state)
}

/// Template resolver with a token cache
#[derive(Default)]
pub struct TemplateResolver {
    cache: DashMap<String, Arc<Vec<Token>>>,
}

impl TemplateResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse template into tokens (with caching)
    pub fn tokenize(&self, template: &str) -> Arc<Vec<Token>> {
        if let Some(cached) = self.cache.get(template) {
            return Arc::clone(&cached);
        }
        let tokens = Arc::new(tokenize(template));
        self.cache.insert(template.to_string(), Arc::clone(&tokens));
        tokens
    }

    pub fn resolve(
        &self,
        template: &str,
        inputs: &BTreeMap<String, String>,
        state: &Record,
    ) -> Result<String, TemplateError> {
        let tokens = self.tokenize(template);
        render(template, &tokens, inputs, state)
    }

    /// Evaluate a step's input mapping against state only
    pub fn resolve_inputs(
        &self,
        mapping: &OrderedMap<String>,
        state: &Record,
    ) -> Result<BTreeMap<String, String>, TemplateError> {
        let no_inputs = BTreeMap::new();
        mapping
            .iter()
            .map(|(name, template)| {
                self.resolve(template, &no_inputs, state)
                    .map(|text| (name.to_string(), text))
            })
            .collect()
    }

    pub fn cached_templates(&self) -> usize {
        self.cache.len()
    }
}

fn render(
    template: &str,
    tokens: &[Token],
    inputs: &BTreeMap<String, String>,
    state: &Record,
) -> Result<String, TemplateError> {
    let mut result = String::with_capacity(template.len() + 64);

    for token in tokens {
        match token {
            Token::Literal(range) => result.push_str(&template[range.clone()]),
            Token::Escaped(c) => result.push(*c),
            Token::Var(path) => lookup(path, inputs, state, &mut result)?,
        }
    }

    Ok(result)
}

fn lookup(
    path: &str,
    inputs: &BTreeMap<String, String>,
    state: &Record,
    out: &mut String,
) -> Result<(), TemplateError> {
    let mut segments = path.split('.');
    let head = segments.next().unwrap_or_default();

    if let Some(text) = inputs.get(head) {
        return match segments.next() {
            None => {
                out.push_str(text);
                Ok(())
            }
            Some(segment) => Err(TemplateError::InvalidTraversal {
                placeholder: path.to_string(),
                segment: segment.to_string(),
                value_type: "str".to_string(),
            }),
        };
    }

    let Some(mut current) = state.get(head) else {
        return Err(unresolved(path, head, inputs, state));
    };

    for segment in segments {
        match step_into(current, segment) {
            Some(next) => current = next,
            None => {
                return Err(match current {
                    Value::Object(map) => {
                        let available: Vec<String> = map.keys().cloned().collect();
                        TemplateError::PathNotFound {
                            placeholder: path.to_string(),
                            segment: segment.to_string(),
                            suggestion: closest_match(segment, available.iter().map(String::as_str)),
                            available,
                        }
                    }
                    Value::Array(items) => TemplateError::PathNotFound {
                        placeholder: path.to_string(),
                        segment: segment.to_string(),
                        suggestion: None,
                        available: (0..items.len()).map(|i| i.to_string()).collect(),
                    },
                    other => TemplateError::InvalidTraversal {
                        placeholder: path.to_string(),
                        segment: segment.to_string(),
                        value_type: crate::record::json_kind(other),
                    },
                });
            }
        }
    }

    push_value(current, out);
    Ok(())
}

fn unresolved(
    path: &str,
    head: &str,
    inputs: &BTreeMap<String, String>,
    state: &Record,
) -> TemplateError {
    let available_inputs: Vec<String> = inputs.keys().cloned().collect();
    let available_state: Vec<String> = state.field_names().map(str::to_string).collect();

    // `{state.x}` is not a grammar form; point at `{x}`
    let suggestion = match path.strip_prefix("state.") {
        Some(rest) if state.get_path(rest).is_some() => Some(rest.to_string()),
        _ => closest_match(
            head,
            available_inputs
                .iter()
                .chain(available_state.iter())
                .map(String::as_str),
        ),
    };

    TemplateError::UnresolvedVariable {
        placeholder: path.to_string(),
        suggestion,
        available_inputs,
        available_state,
    }
}

/// Strings raw, scalars in canonical text form, containers as compact JSON
fn push_value(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Null => out.push_str("null"),
        other => out.push_str(&other.to_string()),
    }
}
