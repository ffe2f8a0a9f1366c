//! End-to-end pipeline tests driven by the mock provider

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};

use flowline::event::{EventKind, EventLog, ObservabilitySink};
use flowline::provider::{
    Capabilities, Generation, GenerationRequest, LlmError, MockProvider, ProviderRegistry,
    TextGenerator,
};
use flowline::runtime::{Phase, Pipeline, PipelineOptions, RuntimeState, StepExecutor};
use flowline::tools::ToolRegistry;
use flowline::{validate, Observer, WorkflowConfig};

const ECHO: &str = r#"
schema_version: "1.0"
flow: {name: echo}
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
config:
  llm: {provider: mock, model: mock-1}
  execution: {max_retries: 2, retry_initial_delay_ms: 1, retry_max_delay_ms: 5}
"#;

const RESEARCH: &str = r#"
schema_version: "1.0"
flow: {name: research}
types:
  Source:
    title: {type: str}
    url: {type: str}
state:
  fields:
    topic: {type: str, required: true}
    report: {type: "object{headline:str,sources:list[Source]}"}
    summary: {type: str}
    word_count: {type: float}
nodes:
  - id: research
    prompt: "Research {topic}"
    outputs: [report]
    output_schema: "object{headline:str,sources:list[Source]}"
  - id: summarize
    prompt: "Summarize '{title}' citing {report.sources.0.url}"
    inputs: {title: "{report.headline}"}
    outputs: [summary, word_count]
    output_schema:
      summary: {type: str}
      word_count: {type: int}
edges:
  - {from: START, to: research}
  - {from: research, to: summarize}
  - {from: summarize, to: END}
config:
  llm: {provider: mock, model: mock-1}
"#;

fn options(mock: &Arc<MockProvider>) -> PipelineOptions {
    let mut providers = ProviderRegistry::new();
    providers.register(Arc::clone(mock) as Arc<dyn TextGenerator>);
    PipelineOptions::new(providers)
}

fn inputs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

async fn run(yaml: &str, mock: &Arc<MockProvider>, input: Value) -> flowline::Result<Value> {
    let mut pipeline = Pipeline::from_yaml(yaml, options(mock))?;
    let output = pipeline.run(inputs(input)).await?;
    Ok(Value::Object(output.state))
}

// ═══════════════════════════════════════════════════════════════
// Scenarios
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn scenario_a_minimal_linear_workflow() {
    let mock = Arc::new(MockProvider::new());
    let state = run(ECHO, &mock, json!({"topic": "hello"})).await.unwrap();

    assert_eq!(state, json!({"topic": "hello", "result": "generated result"}));
    assert_eq!(mock.call_count(), 1);
    assert_eq!(mock.last_request().unwrap().prompt, "Echo hello");
}

#[tokio::test]
async fn scenario_b_missing_required_input() {
    let mock = Arc::new(MockProvider::new());
    let err = run(ECHO, &mock, json!({})).await.unwrap_err();

    assert_eq!(err.root_cause().kind(), "StateInitializationError");
    assert!(err.to_string().contains("topic"));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn scenario_c_unknown_prompt_variable() {
    let mock = Arc::new(MockProvider::new());
    let yaml = ECHO.replace("Echo {topic}", "{unknwn}");
    let err = run(&yaml, &mock, json!({"topic": "x"})).await.unwrap_err();

    let root = err.root_cause();
    assert_eq!(root.kind(), "ConfigValidationError");
    assert!(root.to_string().contains("unknwn"));
    assert!(root.to_string().contains("state: [topic, result]"));
    assert_eq!(err.suggestion(), Some("topic"));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn scenario_c_typo_gets_nearest_match() {
    let mock = Arc::new(MockProvider::new());
    let yaml = ECHO.replace("Echo {topic}", "Echo {topc}");
    let err = run(&yaml, &mock, json!({"topic": "x"})).await.unwrap_err();

    assert_eq!(err.suggestion(), Some("topic"));
}

#[tokio::test]
async fn scenario_d_cyclic_edges() {
    let yaml = r#"
schema_version: "1.0"
flow: {name: loop}
state:
  fields:
    a: {type: str}
    b: {type: str}
nodes:
  - {id: A, prompt: "first", outputs: [a], output_schema: str}
  - {id: B, prompt: "second {a}", outputs: [b], output_schema: str}
edges:
  - {from: START, to: A}
  - {from: A, to: B}
  - {from: B, to: A}
  - {from: B, to: END}
config:
  llm: {provider: mock, model: mock-1}
"#;
    let mock = Arc::new(MockProvider::new());
    let mut pipeline = Pipeline::from_yaml(yaml, options(&mock)).unwrap();

    let err = pipeline.run(Map::new()).await.unwrap_err();

    assert_eq!(err.root_cause().kind(), "ConfigValidationError");
    assert!(err.to_string().contains("cycle detected"));
    assert_eq!(pipeline.history(), &[Phase::Loaded, Phase::Failed]);
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn scenario_e_output_state_type_mismatch() {
    let mock = Arc::new(MockProvider::new());
    let yaml = ECHO.replace("      result: {type: str}\n", "      result: {type: int}\n");
    let err = run(&yaml, &mock, json!({"topic": "x"})).await.unwrap_err();

    let root = err.root_cause();
    assert_eq!(root.kind(), "ConfigValidationError");
    assert!(root.to_string().contains("output 'result' is int but state field 'result' is str"));
    assert_eq!(mock.call_count(), 0);
}

// ═══════════════════════════════════════════════════════════════
// Properties
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn failing_checks_never_call_the_provider() {
    let broken = [
        ECHO.replace("outputs: [result]", "outputs: [missing]"),
        ECHO.replace("{from: echo, to: END}", "{from: echo, to: ENDD}"),
        ECHO.replace("{type: str}\nnodes", "{type: strr}\nnodes"),
        ECHO.replace("id: echo", "id: END"),
        ECHO.replace("Echo {topic}", "Echo {state.topic}"),
    ];
    for yaml in &broken {
        let mock = Arc::new(MockProvider::new());
        let err = run(yaml, &mock, json!({"topic": "x"})).await.unwrap_err();
        assert!(err.is_validation_stage(), "{}", err);
        assert_eq!(mock.call_count(), 0, "{}", err);
    }
}

#[tokio::test]
async fn state_threads_through_steps() {
    let mock = Arc::new(MockProvider::new());
    mock.queue_json(json!({
        "report": {
            "headline": "Rust 2026",
            "sources": [{"title": "Blog", "url": "https://blog.rust-lang.org"}]
        }
    }));
    mock.queue_json(json!({"summary": "short", "word_count": 12}));

    let state = run(RESEARCH, &mock, json!({"topic": "rust"})).await.unwrap();

    assert_eq!(state["summary"], json!("short"));
    assert_eq!(state["word_count"], json!(12.0));
    assert_eq!(state["report"]["sources"][0]["url"], json!("https://blog.rust-lang.org"));

    let prompts: Vec<String> = mock.requests().into_iter().map(|r| r.prompt).collect();
    assert_eq!(
        prompts,
        vec![
            "Research rust".to_string(),
            "Summarize 'Rust 2026' citing https://blog.rust-lang.org".to_string()
        ]
    );
}

#[tokio::test]
async fn input_mapping_wins_over_state_field() {
    let mock = Arc::new(MockProvider::new());
    let yaml = ECHO.replace(
        "    prompt: \"Echo {topic}\"\n",
        "    prompt: \"Echo {topic}\"\n    inputs: {topic: \"mapped {topic}\"}\n",
    );

    run(&yaml, &mock, json!({"topic": "raw"})).await.unwrap();

    assert_eq!(mock.last_request().unwrap().prompt, "Echo mapped raw");
}

#[tokio::test]
async fn unset_optional_object_resolves_to_empty_fields() {
    let mock = Arc::new(MockProvider::new());
    let yaml = ECHO
        .replace(
            "    topic: {type: str, required: true}\n",
            "    topic: {type: str, required: true}\n    report: {type: \"object{title:str}\"}\n",
        )
        .replace("Echo {topic}", "Echo {topic} about '{report.title}'");
    let state = run(&yaml, &mock, json!({"topic": "hello"})).await.unwrap();

    assert_eq!(mock.last_request().unwrap().prompt, "Echo hello about ''");
    assert_eq!(state["report"], json!({"title": ""}));
}

#[tokio::test]
async fn execute_never_mutates_the_given_state() {
    let workflow = validate(WorkflowConfig::parse(ECHO).unwrap()).unwrap();
    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(MockProvider::new()));
    let executor = StepExecutor::new(
        Arc::new(providers),
        Arc::new(ToolRegistry::new()),
        Arc::new(Observer::new()),
    );

    let before =
        RuntimeState::initialize(workflow.state_schema(), inputs(json!({"topic": "t"}))).unwrap();
    let snapshot = before.clone();

    let outcome = executor
        .execute(&workflow.steps()[0], &before, &workflow.config().config)
        .await
        .unwrap();

    assert_eq!(before, snapshot);
    assert_eq!(before.get("result"), Some(&json!("")));
    assert_eq!(outcome.state.get("result"), Some(&json!("generated result")));
}

// ═══════════════════════════════════════════════════════════════
// Failures at run time
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn transient_errors_are_retried() {
    let mock = Arc::new(MockProvider::new());
    mock.queue_error(LlmError::RateLimited {
        provider: "mock".into(),
        retry_after_secs: None,
    });
    mock.queue_raw("not json at all");
    mock.queue_json(json!({"result": "third time"}));

    let state = run(ECHO, &mock, json!({"topic": "x"})).await.unwrap();

    assert_eq!(state["result"], json!("third time"));
    assert_eq!(mock.call_count(), 3);
}

#[tokio::test]
async fn terminal_errors_stop_the_run() {
    let mock = Arc::new(MockProvider::new());
    mock.queue_error(LlmError::Auth {
        provider: "mock".into(),
        message: "bad key".into(),
    });
    let mut pipeline = Pipeline::from_yaml(ECHO, options(&mock)).unwrap();

    let err = pipeline.run(inputs(json!({"topic": "x"}))).await.unwrap_err();

    assert_eq!(err.kind(), "WorkflowExecutionError");
    assert_eq!(err.step_id(), Some("echo"));
    assert_eq!(err.root_cause().kind(), "LLMAPIError");
    assert!(!err.is_recoverable());
    assert_eq!(mock.call_count(), 1);
    assert_eq!(pipeline.phase(), Phase::Failed);

    let failed = pipeline.event_log().filter_step("echo");
    assert!(matches!(
        failed.last().map(|e| &e.kind),
        Some(EventKind::StepFailed { .. })
    ));
}

struct SlowProvider;

#[async_trait]
impl TextGenerator for SlowProvider {
    fn name(&self) -> &str {
        "slow"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<Generation, LlmError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Err(LlmError::Timeout {
            provider: "slow".into(),
        })
    }
}

#[tokio::test]
async fn step_timeout_is_enforced() {
    let yaml = ECHO
        .replace("provider: mock", "provider: slow")
        .replace("    output_schema:\n", "    timeout_seconds: 1\n    output_schema:\n");
    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(SlowProvider));
    let mut pipeline = Pipeline::from_yaml(&yaml, PipelineOptions::new(providers)).unwrap();

    let err = pipeline.run(inputs(json!({"topic": "x"}))).await.unwrap_err();

    assert_eq!(err.root_cause().kind(), "TimeoutError");
    assert_eq!(err.step_id(), Some("echo"));
    assert!(err.to_string().contains("1000ms"));
}

#[tokio::test]
async fn unavailable_provider_fails_before_running() {
    let yaml = ECHO.replace("provider: mock", "provider: openai");
    let mock = Arc::new(MockProvider::new());
    let mut opts = options(&mock);
    let mut providers = ProviderRegistry::new();
    providers.mark_unavailable("openai", "no API key");
    opts.providers = Arc::new(providers);
    let mut pipeline = Pipeline::from_yaml(&yaml, opts).unwrap();

    let err = pipeline.run(inputs(json!({"topic": "x"}))).await.unwrap_err();

    assert_eq!(err.root_cause().kind(), "LLMConfigError");
    assert!(err.is_validation_stage());
    assert!(!pipeline.history().contains(&Phase::Running));
}

// ═══════════════════════════════════════════════════════════════
// Observability
// ═══════════════════════════════════════════════════════════════

struct ExplodingSink;

impl ObservabilitySink for ExplodingSink {
    fn name(&self) -> &str {
        "exploding"
    }

    fn record(&self, _kind: &EventKind) -> anyhow::Result<()> {
        panic!("sink is broken");
    }
}

#[tokio::test]
async fn panicking_sink_does_not_change_the_outcome() {
    let mock = Arc::new(MockProvider::new());
    let opts = options(&mock).with_sink(Arc::new(ExplodingSink));
    let mut pipeline = Pipeline::from_yaml(ECHO, opts).unwrap();

    let output = pipeline.run(inputs(json!({"topic": "x"}))).await.unwrap();

    assert_eq!(output.get("result"), Some(&json!("generated result")));
    assert!(pipeline.observer().failures() > 0);
}

#[tokio::test]
async fn events_follow_the_run() {
    let mock = Arc::new(MockProvider::new());
    let trace = EventLog::new();
    let opts = options(&mock).with_sink(Arc::new(trace.clone()));
    let mut pipeline = Pipeline::from_yaml(ECHO, opts).unwrap();

    let output = pipeline.run(inputs(json!({"topic": "x"}))).await.unwrap();

    let names: Vec<&str> = trace.with_events(|events| events.iter().map(|e| e.kind.name()).collect());
    assert_eq!(
        names,
        vec![
            "workflow_started",
            "step_started",
            "template_resolved",
            "provider_called",
            "provider_responded",
            "step_completed",
            "workflow_completed",
        ]
    );
    assert_eq!(pipeline.event_log().len(), trace.len());
    assert!(output.metrics.usage.total_tokens > 0);
    assert_eq!(output.metrics.steps[0].provider, "mock");
}

#[tokio::test]
async fn priced_models_report_cost() {
    let mock = Arc::new(MockProvider::new());
    let yaml = ECHO.replace("model: mock-1", "model: gpt-4o-mini");
    let mut pipeline = Pipeline::from_yaml(&yaml, options(&mock)).unwrap();
    let output = pipeline.run(inputs(json!({"topic": "hello"}))).await.unwrap();

    let step_cost = output.metrics.steps[0].cost_usd;
    assert!(step_cost > 0.0);
    assert_eq!(output.metrics.cost_usd, step_cost);

    let events = pipeline.event_log().events();
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::ProviderResponded { cost_usd, .. } if *cost_usd == step_cost
    )));
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::WorkflowCompleted { cost_usd, .. } if *cost_usd == step_cost
    )));
}

#[tokio::test]
async fn unpriced_models_cost_nothing() {
    let mock = Arc::new(MockProvider::new());
    let mut pipeline = Pipeline::from_yaml(ECHO, options(&mock)).unwrap();
    let output = pipeline.run(inputs(json!({"topic": "hello"}))).await.unwrap();
    assert_eq!(output.metrics.cost_usd, 0.0);
}

#[tokio::test]
async fn disabled_observability_keeps_the_log_empty() {
    let mock = Arc::new(MockProvider::new());
    let yaml = format!("{}  observability: {{enabled: false}}\n", ECHO);
    let mut pipeline = Pipeline::from_yaml(&yaml, options(&mock)).unwrap();

    pipeline.run(inputs(json!({"topic": "x"}))).await.unwrap();

    assert!(pipeline.event_log().is_empty());
}
