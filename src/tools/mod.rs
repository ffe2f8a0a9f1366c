//! Tools callable by a text generator during a step
//!
//! Concrete tools live outside the engine; the engine only resolves names
//! to [`ToolHandle`]s through an explicit [`ToolRegistry`] and threads the
//! handles into the generation request.
//!
//! ```rust,ignore
//! let mut tools = ToolRegistry::new();
//! tools.register(FnTool::new("word_count", "Count words", schema, |args| {
//!     let text = args["text"].as_str().unwrap_or_default();
//!     Ok(json!({"words": text.split_whitespace().count()}))
//! }));
//! let handle = tools.resolve_tool("word_count")?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::FlowlineError;
use crate::util::closest_match;

// ═══════════════════════════════════════════════════════════════════════════
// TOOL TRAIT
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait Tool: Send + Sync {
    /// Name used in `tools:` lists and function calls
    fn name(&self) -> &str;

    /// Description shown to the model
    fn description(&self) -> &str;

    /// JSON Schema for the arguments object
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value>;
}

/// Shared, opaque reference to a registered tool
#[derive(Clone)]
pub struct ToolHandle(Arc<dyn Tool>);

impl ToolHandle {
    pub fn new(tool: impl Tool + 'static) -> Self {
        Self(Arc::new(tool))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn description(&self) -> &str {
        self.0.description()
    }

    pub fn parameters_schema(&self) -> Value {
        self.0.parameters_schema()
    }

    pub async fn call(&self, args: Value) -> anyhow::Result<Value> {
        self.0.call(args).await
    }
}

impl fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ToolHandle").field(&self.name()).finish()
    }
}

type ToolFn = dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync;

/// Tool backed by a synchronous closure
pub struct FnTool {
    name: String,
    description: String,
    parameters: Value,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        func: F,
    ) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        (self.func)(args)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════

/// Name → tool; built once at startup and passed by reference
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolHandle>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous one with the same name
    pub fn register(&mut self, tool: impl Tool + 'static) -> &mut Self {
        let handle = ToolHandle::new(tool);
        self.tools.insert(handle.name().to_string(), handle);
        self
    }

    pub fn resolve_tool(&self, name: &str) -> Result<ToolHandle, FlowlineError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| FlowlineError::ToolNotFound {
                name: name.to_string(),
                suggestion: closest_match(name, self.tools.keys().map(String::as_str)),
                available: self.names(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn word_count() -> FnTool {
        FnTool::new(
            "word_count",
            "Count words in text",
            json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            |args| {
                let text = args["text"].as_str().unwrap_or_default();
                Ok(json!({"words": text.split_whitespace().count()}))
            },
        )
    }

    #[tokio::test]
    async fn test_resolve_and_call() {
        let mut registry = ToolRegistry::new();
        registry.register(word_count());

        let handle = registry.resolve_tool("word_count").unwrap();
        assert_eq!(handle.name(), "word_count");
        let out = handle.call(json!({"text": "a b c"})).await.unwrap();
        assert_eq!(out, json!({"words": 3}));
    }

    #[test]
    fn test_unknown_tool_suggests_nearest() {
        let mut registry = ToolRegistry::new();
        registry.register(word_count());

        let err = registry.resolve_tool("word_cont").unwrap_err();
        assert_eq!(err.code(), "FLOW-050");
        assert_eq!(err.suggestion(), Some("word_count"));
    }

    #[test]
    fn test_unknown_tool_without_near_match() {
        let registry = ToolRegistry::new();
        let err = registry.resolve_tool("search").unwrap_err();
        assert_eq!(err.suggestion(), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handle_debug_shows_name() {
        let handle = ToolHandle::new(word_count());
        assert_eq!(format!("{:?}", handle), "ToolHandle(\"word_count\")");
    }
}
