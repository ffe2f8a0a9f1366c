//! OpenAI-compatible provider (Chat Completions)
//!
//! - output constrained with `response_format: json_schema`
//! - declared tools exposed as functions; tool calls are executed and fed
//!   back until the model answers or `MAX_TOOL_ROUNDS` is hit
//! - HTTP status mapped onto `LlmError` so the retry policy can decide

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{
    parse_output, Capabilities, Generation, GenerationRequest, LlmError, TextGenerator, TokenUsage,
};
use crate::util::{CONNECT_TIMEOUT, MAX_TOOL_ROUNDS};

/// Default API base; `/chat/completions` is appended
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const PROVIDER: &str = "openai";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, request: &GenerationRequest) -> String {
        let base = request
            .config
            .base_url
            .as_deref()
            .map(|b| b.trim_end_matches('/'))
            .unwrap_or(&self.base_url);
        format!("{}/chat/completions", base)
    }

    fn build_payload(&self, request: &GenerationRequest, messages: &[Value]) -> ChatCompletionRequest {
        let schema = &request.output_type;
        let strict = !schema.descriptor().contains_map();
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.parameters_schema(),
                    }
                })
            })
            .collect();

        ChatCompletionRequest {
            model: request.config.model.clone(),
            messages: messages.to_vec(),
            temperature: request.config.temperature,
            max_tokens: request.config.max_tokens,
            response_format: json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name(),
                    "strict": strict,
                    "schema": schema.json_schema(),
                }
            }),
            tools,
        }
    }

    async fn send(&self, url: &str, payload: &ChatCompletionRequest) -> Result<ChatCompletionResponse, LlmError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            warn!(provider = PROVIDER, status = %status, "API error");
            return Err(classify_status(status, api_message(&body), retry_after_secs));
        }

        response.json().await.map_err(|e| LlmError::InvalidOutput {
            provider: PROVIDER.to_string(),
            reason: format!("malformed response body: {}", e),
        })
    }

    async fn run_tool_call(&self, request: &GenerationRequest, call: &ToolCall) -> Result<Value, LlmError> {
        let name = &call.function.name;
        let failed = |reason: String| LlmError::ToolFailed {
            tool: name.clone(),
            reason,
        };

        let tool = request
            .tools
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| failed("model called a tool that is not bound to this step".to_string()))?;
        let args: Value = if call.function.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&call.function.arguments)
                .map_err(|e| failed(format!("arguments are not JSON: {}", e)))?
        };

        debug!(provider = PROVIDER, tool = %name, "calling tool");
        tool.call(args).await.map_err(|e| failed(format!("{:#}", e)))
    }
}

#[async_trait]
impl TextGenerator for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            tool_use: true,
            structured_output: true,
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, LlmError> {
        let url = self.endpoint(request);
        let mut messages = vec![json!({"role": "user", "content": request.prompt})];
        let mut usage = TokenUsage::default();

        for round in 0..=MAX_TOOL_ROUNDS {
            let payload = self.build_payload(request, &messages);
            debug!(
                provider = PROVIDER,
                model = %payload.model,
                round,
                messages = payload.messages.len(),
                "sending chat completion"
            );

            let response = self.send(&url, &payload).await?;
            if let Some(u) = response.usage {
                usage.add(TokenUsage::new(u.prompt_tokens, u.completion_tokens));
            }

            let message = response
                .choices
                .into_iter()
                .next()
                .map(|c| c.message)
                .ok_or_else(|| LlmError::InvalidOutput {
                    provider: PROVIDER.to_string(),
                    reason: "response has no choices".to_string(),
                })?;

            if message.tool_calls.is_empty() {
                if let Some(refusal) = message.refusal {
                    return Err(LlmError::InvalidOutput {
                        provider: PROVIDER.to_string(),
                        reason: format!("model refused: {}", refusal),
                    });
                }
                let raw = message.content.unwrap_or_default();
                let record = parse_output(PROVIDER, &raw, &request.output_type)?;
                if usage.total_tokens == 0 {
                    usage = TokenUsage::estimate(request.prompt.len(), raw.len());
                }
                return Ok(Generation { record, usage, raw });
            }

            messages.push(json!({
                "role": "assistant",
                "content": message.content,
                "tool_calls": message.tool_calls,
            }));
            for call in &message.tool_calls {
                let result = self.run_tool_call(request, call).await?;
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": result.to_string(),
                }));
            }
        }

        Err(LlmError::ToolLoopExceeded {
            provider: PROVIDER.to_string(),
            rounds: MAX_TOOL_ROUNDS,
        })
    }
}

fn classify_transport(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout {
            provider: PROVIDER.to_string(),
        }
    } else {
        LlmError::Transient {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        }
    }
}

fn classify_status(status: StatusCode, message: String, retry_after_secs: Option<u64>) -> LlmError {
    let provider = PROVIDER.to_string();
    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            provider,
            retry_after_secs,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Auth { provider, message },
        StatusCode::REQUEST_TIMEOUT => LlmError::Timeout { provider },
        s if s.is_server_error() => LlmError::Transient {
            provider,
            reason: format!("{}: {}", s, message),
        },
        s => LlmError::Api {
            provider,
            status: s.as_u16(),
            message,
        },
    }
}

/// `error.message` from an OpenAI error body, else the body itself
fn api_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    response_format: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{parse_type, ObjectField};
    use crate::provider::GenerationConfig;
    use crate::record::{build_record_type, RecordMode};
    use crate::tools::{FnTool, ToolHandle};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> GenerationRequest {
        let schema = build_record_type(
            &[ObjectField::new("summary", parse_type("str").unwrap(), true)],
            "SummarizeOutput",
            RecordMode::Output,
        )
        .unwrap();
        let mut config = GenerationConfig::new("openai", "gpt-4o-mini");
        config.temperature = Some(0.2);
        GenerationRequest::new("Summarize rust", schema, config)
    }

    fn completion(content: &str) -> Value {
        json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17}
        })
    }

    #[tokio::test]
    async fn test_structured_output_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "response_format": {"type": "json_schema", "json_schema": {"name": "SummarizeOutput", "strict": true}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(r#"{"summary": "fast"}"#)))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new("test-key").with_base_url(server.uri());
        let generation = provider.generate(&request()).await.unwrap();

        assert_eq!(generation.record.get("summary"), Some(&json!("fast")));
        assert_eq!(generation.usage, TokenUsage::new(12, 5));
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_json(json!({"error": {"message": "slow down"}})),
            )
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new("k").with_base_url(server.uri());
        let err = provider.generate(&request()).await.unwrap_err();
        assert_eq!(
            err,
            LlmError::RateLimited {
                provider: "openai".into(),
                retry_after_secs: Some(7)
            }
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_auth_error_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "bad key"}})),
            )
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new("k").with_base_url(server.uri());
        let err = provider.generate(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Auth { ref message, .. } if message == "bad key"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_tool_call_loop() {
        let server = MockServer::start().await;
        // second round: the tool result is in the transcript
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"messages": [{}, {}, {"role": "tool", "tool_call_id": "call_1"}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(r#"{"summary": "3 words"}"#)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "word_count", "arguments": "{\"text\": \"a b c\"}"}
                    }]
                }}]
            })))
            .mount(&server)
            .await;

        let tool = ToolHandle::new(FnTool::new("word_count", "Count words", json!({"type": "object"}), |args| {
            Ok(json!({"words": args["text"].as_str().unwrap_or_default().split_whitespace().count()}))
        }));
        let provider = OpenAiProvider::new("k").with_base_url(server.uri());
        let generation = provider
            .generate(&request().with_tools(vec![tool]))
            .await
            .unwrap();

        assert_eq!(generation.record.get("summary"), Some(&json!("3 words")));
    }

    #[test]
    fn test_api_message_extraction() {
        assert_eq!(api_message(r#"{"error": {"message": "nope"}}"#), "nope");
        assert_eq!(api_message("plain text"), "plain text");
    }

    #[test]
    fn test_request_base_url_overrides_provider() {
        let provider = OpenAiProvider::new("k").with_base_url("http://a/v1/");
        assert_eq!(provider.base_url(), "http://a/v1");
        let mut req = request();
        assert_eq!(provider.endpoint(&req), "http://a/v1/chat/completions");
        req.config.base_url = Some("http://b/v1".into());
        assert_eq!(provider.endpoint(&req), "http://b/v1/chat/completions");
    }
}
