//! # Text Generation Providers
//!
//! The step executor talks to LLM backends only through [`TextGenerator`]:
//!
//! ```rust,ignore
//! #[async_trait]
//! pub trait TextGenerator: Send + Sync {
//!     fn name(&self) -> &str;
//!     fn capabilities(&self) -> Capabilities;
//!     async fn generate(&self, request: &GenerationRequest) -> Result<Generation, LlmError>;
//! }
//! ```
//!
//! A generator must either return a [`Record`] that satisfies the request's
//! output type or a typed [`LlmError`]; partial output never leaks through.
//!
//! | Provider | Use Case | Features |
//! |----------|----------|----------|
//! | `openai` | Production | Chat Completions, json_schema output, function tools |
//! | `mock` | Testing | Schema-driven synthesis, queued responses, call counting |
//!
//! Retries are not built into providers; wrap one in [`RetryingGenerator`].

mod mock;
mod openai;
mod registry;
mod retrying;

pub use mock::MockProvider;
pub use openai::OpenAiProvider;
pub use registry::ProviderRegistry;
pub use retrying::RetryingGenerator;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::record::{Record, RecordSchema};
use crate::resilience::Retryable;
use crate::tools::ToolHandle;

// ============================================================================
// TOKEN ESTIMATION
// ============================================================================

/// Average characters per token for mixed content (prose + code)
const CHARS_PER_TOKEN: f32 = 3.0;

// ============================================================================
// CAPABILITIES
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Supports tool/function calling
    pub tool_use: bool,
    /// Can constrain output to a JSON Schema
    pub structured_output: bool,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("{provider}: rate limited{}", .retry_after_secs.map(|s| format!(" (retry after {}s)", s)).unwrap_or_default())]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    #[error("{provider}: transient failure: {reason}")]
    Transient { provider: String, reason: String },

    #[error("{provider}: request timed out")]
    Timeout { provider: String },

    #[error("{provider}: authentication failed: {message}")]
    Auth { provider: String, message: String },

    #[error("{provider}: API error {status}: {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    /// Response did not satisfy the requested output type
    #[error("{provider}: invalid structured output: {reason}")]
    InvalidOutput { provider: String, reason: String },

    #[error("tool '{tool}' failed: {reason}")]
    ToolFailed { tool: String, reason: String },

    #[error("{provider}: gave up after {rounds} tool-call rounds")]
    ToolLoopExceeded { provider: String, rounds: usize },
}

impl LlmError {
    /// Rate limits, transient/network failures, timeouts and bad output
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Transient { .. }
                | Self::Timeout { .. }
                | Self::InvalidOutput { .. }
        )
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::RateLimited { provider, .. }
            | Self::Transient { provider, .. }
            | Self::Timeout { provider }
            | Self::Auth { provider, .. }
            | Self::Api { provider, .. }
            | Self::InvalidOutput { provider, .. }
            | Self::ToolLoopExceeded { provider, .. } => Some(provider),
            Self::ToolFailed { .. } => None,
        }
    }
}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        LlmError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

// ============================================================================
// REQUEST / RESPONSE
// ============================================================================

/// LLM settings after step → workflow → defaults merging
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationConfig {
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl GenerationConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Every field required; see `RecordMode::Output`
    pub output_type: Arc<RecordSchema>,
    pub tools: Vec<ToolHandle>,
    pub config: GenerationConfig,
}

impl GenerationRequest {
    pub fn new(
        prompt: impl Into<String>,
        output_type: Arc<RecordSchema>,
        config: GenerationConfig,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            output_type,
            tools: Vec::new(),
            config,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolHandle>) -> Self {
        self.tools = tools;
        self
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(ToolHandle::name).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Generation {
    pub record: Record,
    pub usage: TokenUsage,
    /// Final response text as returned by the backend
    pub raw: String,
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt: u32, completion: u32) -> Self {
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    /// Estimate from character counts when the backend reports nothing
    pub fn estimate(prompt_len: usize, response_len: usize) -> Self {
        let prompt_tokens = (prompt_len as f32 / CHARS_PER_TOKEN).ceil() as u32;
        let completion_tokens = (response_len as f32 / CHARS_PER_TOKEN).ceil() as u32;
        Self::new(prompt_tokens, completion_tokens)
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }

    /// Estimated cost in USD; models without a known price cost nothing
    pub fn estimate_cost_usd(&self, model: &str) -> f64 {
        let Some((input_price, output_price)) = price_per_million(model) else {
            return 0.0;
        };
        (self.prompt_tokens as f64 / 1_000_000.0) * input_price
            + (self.completion_tokens as f64 / 1_000_000.0) * output_price
    }
}

/// USD per million tokens (input, output), most specific names first
const PRICES: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.0),
    ("gpt-4.1-nano", 0.10, 0.40),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1", 2.00, 8.00),
    ("o3-mini", 1.10, 4.40),
    ("gpt-3.5-turbo", 0.50, 1.50),
    ("haiku", 0.80, 4.0),
    ("sonnet", 3.0, 15.0),
    ("opus", 15.0, 75.0),
];

fn price_per_million(model: &str) -> Option<(f64, f64)> {
    let model = model.to_lowercase();
    PRICES
        .iter()
        .find(|(name, _, _)| model.contains(name))
        .map(|(_, input, output)| (*input, *output))
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider name (e.g. "openai", "mock")
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// One all-or-nothing generation
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, LlmError>;

    fn supports_tools(&self) -> bool {
        self.capabilities().tool_use
    }
}

/// Parse a response body into an instance of `schema`.
///
/// Accepts bare JSON or JSON wrapped in a ``` fence.
pub fn parse_output(
    provider: &str,
    raw: &str,
    schema: &Arc<RecordSchema>,
) -> Result<Record, LlmError> {
    let invalid = |reason: String| LlmError::InvalidOutput {
        provider: provider.to_string(),
        reason,
    };

    let value: Value =
        serde_json::from_str(strip_fence(raw)).map_err(|e| invalid(format!("not JSON: {}", e)))?;
    let Value::Object(map) = value else {
        return Err(invalid(format!(
            "expected a JSON object for {}, got {}",
            schema.name(),
            crate::record::json_kind(&value)
        )));
    };
    schema.construct(map).map_err(|e| invalid(e.to_string()))
}

fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{parse_type, ObjectField};
    use crate::record::{build_record_type, RecordMode};
    use serde_json::json;

    fn output_schema() -> Arc<RecordSchema> {
        build_record_type(
            &[
                ObjectField::new("summary", parse_type("str").unwrap(), true),
                ObjectField::new("score", parse_type("float").unwrap(), true),
            ],
            "SummarizeOutput",
            RecordMode::Output,
        )
        .unwrap()
    }

    #[test]
    fn test_token_usage_estimate() {
        let usage = TokenUsage::estimate(300, 150);
        assert_eq!(usage, TokenUsage::new(100, 50));
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn test_token_usage_add() {
        let mut total = TokenUsage::default();
        total.add(TokenUsage::new(10, 5));
        total.add(TokenUsage::new(1, 1));
        assert_eq!(total, TokenUsage::new(11, 6));
    }

    #[test]
    fn test_retryable_classification() {
        let transient = LlmError::Transient {
            provider: "openai".into(),
            reason: "502".into(),
        };
        let auth = LlmError::Auth {
            provider: "openai".into(),
            message: "bad key".into(),
        };
        assert!(transient.is_retryable());
        assert!(!auth.is_retryable());
        assert_eq!(auth.provider(), Some("openai"));
    }

    #[test]
    fn test_usage_estimate_cost() {
        // 1M input + 1M output = $0.15 + $0.60
        let usage = TokenUsage::new(1_000_000, 1_000_000);
        assert!((usage.estimate_cost_usd("gpt-4o-mini") - 0.75).abs() < 1e-9);
        assert!((usage.estimate_cost_usd("gpt-4o") - 12.50).abs() < 1e-9);
        assert!((usage.estimate_cost_usd("GPT-4.1-mini-2025-04-14") - 2.0).abs() < 1e-9);
        assert_eq!(usage.estimate_cost_usd("mock-1"), 0.0);
    }

    #[test]
    fn test_rate_limit_carries_retry_after() {
        let limited = LlmError::RateLimited {
            provider: "openai".into(),
            retry_after_secs: Some(7),
        };
        assert_eq!(Retryable::retry_after(&limited), Some(Duration::from_secs(7)));

        let unspecified = LlmError::RateLimited {
            provider: "openai".into(),
            retry_after_secs: None,
        };
        assert_eq!(Retryable::retry_after(&unspecified), None);
    }

    #[test]
    fn test_parse_output_accepts_fenced_json() {
        let raw = "```json\n{\"summary\": \"short\", \"score\": 1}\n```";
        let record = parse_output("mock", raw, &output_schema()).unwrap();
        assert_eq!(record.get("summary"), Some(&json!("short")));
        assert_eq!(record.get("score"), Some(&json!(1.0)));
    }

    #[test]
    fn test_parse_output_rejects_partial() {
        let err = parse_output("mock", r#"{"summary": "short"}"#, &output_schema()).unwrap_err();
        assert!(matches!(err, LlmError::InvalidOutput { .. }));
        assert!(err.to_string().contains("score"));
    }

    #[test]
    fn test_parse_output_rejects_non_object() {
        let err = parse_output("mock", "[1, 2]", &output_schema()).unwrap_err();
        assert!(err.to_string().contains("got list"));
    }
}
