//! Workflow Types - the declarative document
//!
//! - `WorkflowConfig`: aggregate root (metadata, state, nodes, edges, config)
//! - `FieldDecl` / `FieldMap`: declared fields, order preserved
//! - `StepConfig`: one node of the chain
//! - `EdgeConfig`: `from`/`to` pair over START, step ids and END
//! - `GlobalConfig`: `llm`, `execution` and `observability` settings

use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::FlowlineError;

use super::schema_validator::WorkflowSchemaValidator;

/// Supported document version
pub const SCHEMA_VERSION: &str = "1.0";

// ═══════════════════════════════════════════════════════════════
// Ordered maps
// ═══════════════════════════════════════════════════════════════

/// String-keyed map that keeps declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn from_pairs(pairs: Vec<(String, V)>) -> Self {
        Self(pairs)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

struct OrderedMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = OrderedMap<V>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map with string keys")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut entries: Vec<(String, V)> = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            if entries.iter().any(|(k, _)| *k == key) {
                return Err(serde::de::Error::custom(format!("duplicate key '{}'", key)));
            }
            entries.push((key, value));
        }
        Ok(OrderedMap(entries))
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

/// Field name → declaration
pub type FieldMap = OrderedMap<FieldDecl>;

// ═══════════════════════════════════════════════════════════════
// Document
// ═══════════════════════════════════════════════════════════════

/// Field declaration: `{type, required?, default?, description?, fields?}`
///
/// `fields` describes the object behind a bare `object` keyword in `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldDecl {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Option<FieldMap>,
}

impl FieldDecl {
    pub fn of_type(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            required: false,
            default: None,
            description: None,
            fields: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowMeta {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateDecl {
    #[serde(default)]
    pub fields: FieldMap,
}

/// Output schema of a step
///
/// ```yaml
/// output_schema:           # field map (one entry per declared output)
///   summary: {type: str}
/// output_schema: str       # single output, wrapped
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OutputSchemaDecl {
    Type(String),
    Fields(FieldMap),
}

/// Per-step or global LLM settings; unset fields inherit
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl LlmSettings {
    /// Field-by-field merge: values set here win over `base`
    pub fn merged_over(&self, base: &LlmSettings) -> LlmSettings {
        LlmSettings {
            provider: self.provider.clone().or_else(|| base.provider.clone()),
            model: self.model.clone().or_else(|| base.model.clone()),
            temperature: self.temperature.or(base.temperature),
            max_tokens: self.max_tokens.or(base.max_tokens),
            base_url: self.base_url.clone().or_else(|| base.base_url.clone()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    pub id: String,
    pub prompt: String,
    /// Input mapping: name → template evaluated against state
    #[serde(default)]
    pub inputs: OrderedMap<String>,
    pub outputs: Vec<String>,
    pub output_schema: OutputSchemaDecl,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub llm: Option<LlmSettings>,
    /// Overrides `config.execution.timeout_seconds` for this step
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EdgeConfig {
    pub from: String,
    pub to: String,
}

impl EdgeConfig {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

fn default_mode() -> String {
    "sequential".to_string()
}

fn default_timeout_seconds() -> u64 {
    crate::util::DEFAULT_STEP_TIMEOUT.as_secs()
}

fn default_max_retries() -> u32 {
    crate::util::DEFAULT_MAX_RETRIES
}

fn default_initial_delay_ms() -> u64 {
    crate::util::constants::DEFAULT_RETRY_INITIAL_DELAY.as_millis() as u64
}

fn default_max_delay_ms() -> u64 {
    crate::util::constants::DEFAULT_RETRY_MAX_DELAY.as_millis() as u64
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutionSettings {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            retry_initial_delay_ms: default_initial_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    None,
    #[default]
    Log,
    Tracing,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObservabilitySettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub sink: SinkKind,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sink: SinkKind::Log,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

/// The parsed document; read-only once validated
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    pub schema_version: String,
    pub flow: FlowMeta,
    /// Named object types usable in any type string
    #[serde(default)]
    pub types: OrderedMap<FieldMap>,
    #[serde(default)]
    pub state: StateDecl,
    pub nodes: Vec<StepConfig>,
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
    #[serde(default)]
    pub config: GlobalConfig,
}

impl WorkflowConfig {
    /// Parse a YAML (or JSON) document
    ///
    /// Order: syntax, structural JSON-Schema check, version, typed model.
    pub fn parse(text: &str) -> Result<Self, FlowlineError> {
        let value: Value = serde_yaml::from_str(text)?;
        WorkflowSchemaValidator::new()?.validate_value(&value)?;

        let version = value
            .get("schema_version")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if version != SCHEMA_VERSION {
            return Err(FlowlineError::UnsupportedSchemaVersion {
                found: version.to_string(),
                expected: SCHEMA_VERSION.to_string(),
            });
        }

        let workflow: WorkflowConfig =
            serde_json::from_value(value).map_err(|e| FlowlineError::ParseError {
                details: e.to_string(),
            })?;
        debug!(
            flow = %workflow.flow.name,
            steps = workflow.nodes.len(),
            "workflow parsed"
        );
        Ok(workflow)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowlineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FlowlineError::WorkflowNotFound {
                path: path.display().to_string(),
            },
            _ => FlowlineError::Io(e),
        })?;
        Self::parse(&text)
    }

    pub fn step(&self, id: &str) -> Option<&StepConfig> {
        self.nodes.iter().find(|s| s.id == id)
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|s| s.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
schema_version: "1.0"
flow:
  name: echo_flow
state:
  fields:
    topic: {type: str, required: true}
    result: {type: str}
nodes:
  - id: echo
    prompt: "Echo {topic}"
    outputs: [result]
    output_schema:
      result: {type: str}
edges:
  - {from: START, to: echo}
  - {from: echo, to: END}
"#;

    #[test]
    fn test_parse_minimal_workflow() {
        let wf = WorkflowConfig::parse(MINIMAL).unwrap();
        assert_eq!(wf.flow.name, "echo_flow");
        assert_eq!(wf.state.fields.keys().collect::<Vec<_>>(), vec!["topic", "result"]);
        assert!(wf.state.fields.get("topic").unwrap().required);
        assert_eq!(wf.nodes[0].outputs, vec!["result"]);
        assert_eq!(wf.edges[0], EdgeConfig::new("START", "echo"));
        assert_eq!(wf.config.execution.timeout_seconds, 120);
        assert_eq!(wf.config.execution.max_retries, 3);
        assert_eq!(wf.config.observability.sink, SinkKind::Log);
    }

    #[test]
    fn test_output_schema_forms() {
        let yaml = MINIMAL.replace(
            "    output_schema:\n      result: {type: str}\n",
            "    output_schema: str\n",
        );
        let wf = WorkflowConfig::parse(&yaml).unwrap();
        assert_eq!(
            wf.nodes[0].output_schema,
            OutputSchemaDecl::Type("str".to_string())
        );
    }

    #[test]
    fn test_field_order_preserved() {
        let yaml = MINIMAL.replace(
            "    result: {type: str}\nnodes",
            "    zeta: {type: int}\n    alpha: {type: int}\n    result: {type: str}\nnodes",
        );
        let wf = WorkflowConfig::parse(&yaml).unwrap();
        let keys: Vec<_> = wf.state.fields.keys().collect();
        assert_eq!(keys, vec!["topic", "zeta", "alpha", "result"]);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let yaml = MINIMAL.replace("\"1.0\"", "\"2.0\"");
        let err = WorkflowConfig::parse(&yaml).unwrap_err();
        assert_eq!(err.code(), "FLOW-002");
    }

    #[test]
    fn test_rejects_bad_yaml() {
        let err = WorkflowConfig::parse("flow: [unclosed").unwrap_err();
        assert_eq!(err.kind(), "ConfigLoadError");
    }

    #[test]
    fn test_rejects_missing_nodes_structurally() {
        let err = WorkflowConfig::parse("schema_version: \"1.0\"\nflow: {name: x}\n").unwrap_err();
        assert_eq!(err.code(), "FLOW-004");
    }

    #[test]
    fn test_json_document_accepted() {
        let json = r#"{
            "schema_version": "1.0",
            "flow": {"name": "j"},
            "state": {"fields": {"topic": {"type": "str", "required": true}}},
            "nodes": [{"id": "a", "prompt": "{topic}", "outputs": ["topic"],
                       "output_schema": {"topic": {"type": "str"}}}],
            "edges": [{"from": "START", "to": "a"}, {"from": "a", "to": "END"}]
        }"#;
        let wf = WorkflowConfig::parse(json).unwrap();
        assert_eq!(wf.nodes.len(), 1);
    }

    #[test]
    fn test_missing_file() {
        let err = WorkflowConfig::from_file("/definitely/not/here.yaml").unwrap_err();
        assert_eq!(err.code(), "FLOW-003");
    }

    #[test]
    fn test_llm_merge_is_field_by_field() {
        let global = LlmSettings {
            provider: Some("openai".into()),
            model: Some("gpt-4o-mini".into()),
            temperature: Some(0.2),
            max_tokens: Some(500),
            base_url: None,
        };
        let step = LlmSettings {
            model: Some("gpt-4o".into()),
            max_tokens: Some(50),
            ..Default::default()
        };
        let merged = step.merged_over(&global);
        assert_eq!(merged.provider.as_deref(), Some("openai"));
        assert_eq!(merged.model.as_deref(), Some("gpt-4o"));
        assert_eq!(merged.temperature, Some(0.2));
        assert_eq!(merged.max_tokens, Some(50));
    }
}
