//! Provider wrapper that applies a `RetryPolicy` to every generation

use std::sync::Arc;

use async_trait::async_trait;

use super::{Capabilities, Generation, GenerationRequest, LlmError, TextGenerator};
use crate::resilience::RetryPolicy;

pub struct RetryingGenerator {
    inner: Arc<dyn TextGenerator>,
    policy: RetryPolicy,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn TextGenerator>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl TextGenerator for RetryingGenerator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, LlmError> {
        self.policy.execute(|| self.inner.generate(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{parse_type, ObjectField};
    use crate::provider::{GenerationConfig, MockProvider};
    use crate::record::{build_record_type, RecordMode};
    use crate::resilience::RetryConfig;
    use serde_json::json;
    use std::time::Duration;

    fn request() -> GenerationRequest {
        let schema = build_record_type(
            &[ObjectField::new("result", parse_type("str").unwrap(), true)],
            "EchoOutput",
            RecordMode::Output,
        )
        .unwrap();
        GenerationRequest::new("Echo", schema, GenerationConfig::new("mock", "m"))
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig::default()
                .with_max_retries(max_retries)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(0.0),
        )
    }

    #[tokio::test]
    async fn test_retries_invalid_output_then_succeeds() {
        let mock = Arc::new(MockProvider::new());
        mock.queue_raw("{\"wrong\": 1}");
        mock.queue_json(json!({"result": "ok"}));

        let retrying = RetryingGenerator::new(mock.clone(), fast_policy(3));
        let generation = retrying.generate(&request()).await.unwrap();

        assert_eq!(generation.record.get("result"), Some(&json!("ok")));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let mock = Arc::new(MockProvider::new());
        mock.queue_error(LlmError::Auth {
            provider: "mock".into(),
            message: "denied".into(),
        });

        let retrying = RetryingGenerator::new(mock.clone(), fast_policy(3));
        assert!(retrying.generate(&request()).await.is_err());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let mock = Arc::new(MockProvider::new());
        for _ in 0..5 {
            mock.queue_error(LlmError::RateLimited {
                provider: "mock".into(),
                retry_after_secs: None,
            });
        }

        let retrying = RetryingGenerator::new(mock.clone(), fast_policy(2));
        let err = retrying.generate(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited { .. }));
        assert_eq!(mock.call_count(), 3);
        assert_eq!(retrying.name(), "mock");
    }
}
