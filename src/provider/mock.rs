//! Mock provider for testing
//!
//! Returns queued responses, or synthesizes a value that satisfies the
//! requested output type. Records every request and counts calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use super::{
    parse_output, Capabilities, Generation, GenerationRequest, LlmError, TextGenerator, TokenUsage,
};
use crate::ast::{ScalarKind, TypeDescriptor};

enum MockReply {
    Json(Value),
    Raw(String),
    Error(LlmError),
}

pub struct MockProvider {
    /// FIFO of replies; empty means synthesize
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<GenerationRequest>>,
    calls: AtomicUsize,
    tool_use: bool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            tool_use: true,
        }
    }

    /// Queue JSON objects returned in order
    pub fn with_responses(responses: Vec<Value>) -> Self {
        let provider = Self::new();
        for response in responses {
            provider.queue_json(response);
        }
        provider
    }

    /// Report no tool support (feature-gate tests)
    pub fn without_tools(mut self) -> Self {
        self.tool_use = false;
        self
    }

    pub fn queue_json(&self, response: Value) {
        self.replies.lock().push_back(MockReply::Json(response));
    }

    /// Queue a raw response body (parsed like a real backend's)
    pub fn queue_raw(&self, response: impl Into<String>) {
        self.replies.lock().push_back(MockReply::Raw(response.into()));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.replies.lock().push_back(MockReply::Error(error));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().last().cloned()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            tool_use: self.tool_use,
            structured_output: true,
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let reply = self.replies.lock().pop_front();
        let raw = match reply {
            Some(MockReply::Error(e)) => return Err(e),
            Some(MockReply::Json(value)) => value.to_string(),
            Some(MockReply::Raw(text)) => text,
            None => synthesize(&request.output_type.descriptor(), "").to_string(),
        };

        let record = parse_output(self.name(), &raw, &request.output_type)?;
        Ok(Generation {
            record,
            usage: TokenUsage::estimate(request.prompt.len(), raw.len()),
            raw,
        })
    }
}

/// Deterministic value of the given type; strings name their field path
fn synthesize(ty: &TypeDescriptor, path: &str) -> Value {
    match ty {
        TypeDescriptor::Scalar(ScalarKind::String) => json!(format!("generated {}", path)),
        TypeDescriptor::Scalar(ScalarKind::Int) => json!(1),
        TypeDescriptor::Scalar(ScalarKind::Float) => json!(0.5),
        TypeDescriptor::Scalar(ScalarKind::Bool) => json!(true),
        TypeDescriptor::List(item) => json!([synthesize(item, &format!("{}.0", path))]),
        TypeDescriptor::Map { .. } => json!({}),
        TypeDescriptor::Object(fields) => {
            let map: Map<String, Value> = fields
                .iter()
                .map(|f| {
                    let child = if path.is_empty() {
                        f.name.clone()
                    } else {
                        format!("{}.{}", path, f.name)
                    };
                    (f.name.clone(), synthesize(&f.ty, &child))
                })
                .collect();
            Value::Object(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{parse_type, ObjectField};
    use crate::provider::GenerationConfig;
    use crate::record::{build_record_type, RecordMode};

    fn request(fields: &[(&str, &str)]) -> GenerationRequest {
        let fields: Vec<ObjectField> = fields
            .iter()
            .map(|(n, t)| ObjectField::new(*n, parse_type(t).unwrap(), true))
            .collect();
        let schema = build_record_type(&fields, "EchoOutput", RecordMode::Output).unwrap();
        GenerationRequest::new("Echo hello", schema, GenerationConfig::new("mock", "mock-1"))
    }

    #[tokio::test]
    async fn test_synthesizes_from_schema() {
        let provider = MockProvider::new();
        let req = request(&[
            ("result", "str"),
            ("tags", "list[str]"),
            ("meta", "object{ok:bool,n:int}"),
        ]);

        let generation = provider.generate(&req).await.unwrap();
        assert_eq!(generation.record.get("result"), Some(&json!("generated result")));
        assert_eq!(generation.record.get("tags"), Some(&json!(["generated tags.0"])));
        assert_eq!(generation.record.get_path("meta.ok"), Some(&json!(true)));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_queued_responses_then_synthesis() {
        let provider = MockProvider::with_responses(vec![json!({"result": "first"})]);
        let req = request(&[("result", "str")]);

        let first = provider.generate(&req).await.unwrap();
        let second = provider.generate(&req).await.unwrap();
        assert_eq!(first.record.get("result"), Some(&json!("first")));
        assert_eq!(second.record.get("result"), Some(&json!("generated result")));
    }

    #[tokio::test]
    async fn test_queued_error_and_invalid_output() {
        let provider = MockProvider::new();
        provider.queue_error(LlmError::Timeout {
            provider: "mock".into(),
        });
        provider.queue_raw("not json");
        let req = request(&[("result", "str")]);

        assert!(matches!(
            provider.generate(&req).await,
            Err(LlmError::Timeout { .. })
        ));
        assert!(matches!(
            provider.generate(&req).await,
            Err(LlmError::InvalidOutput { .. })
        ));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_records_requests() {
        let provider = MockProvider::new();
        provider.generate(&request(&[("result", "str")])).await.unwrap();

        let last = provider.last_request().unwrap();
        assert_eq!(last.prompt, "Echo hello");
        assert_eq!(last.config.model, "mock-1");
        assert_eq!(provider.requests().len(), 1);
    }

    #[test]
    fn test_without_tools() {
        assert!(MockProvider::new().supports_tools());
        assert!(!MockProvider::new().without_tools().supports_tools());
    }
}
