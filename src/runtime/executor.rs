//! Step Executor - one step against the current state
//!
//! Resolves the input mapping and prompt, builds the generation request,
//! calls the provider under a timeout and returns the next state.
//! Uses DashMap for lock-free caching of retry-wrapped providers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::ast::{GlobalConfig, LlmSettings};
use crate::binding::TemplateResolver;
use crate::error::{FlowlineError, Result};
use crate::event::{EventKind, Observer};
use crate::provider::{
    GenerationConfig, GenerationRequest, ProviderRegistry, RetryingGenerator, TextGenerator,
    TokenUsage,
};
use crate::record::Record;
use crate::resilience::RetryPolicy;
use crate::tools::{ToolHandle, ToolRegistry};
use crate::validate::ValidatedStep;

use super::state::RuntimeState;

/// Everything a step needs that can be checked before the run starts
#[derive(Clone)]
pub struct PreparedStep {
    pub step_id: Arc<str>,
    pub generator: Arc<dyn TextGenerator>,
    pub config: GenerationConfig,
    pub tools: Vec<ToolHandle>,
    pub timeout: Duration,
}

impl std::fmt::Debug for PreparedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStep")
            .field("step_id", &self.step_id)
            .field("provider", &self.generator.name())
            .field("config", &self.config)
            .field("tools", &self.tools)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub state: RuntimeState,
    /// The validated output record
    pub output: Record,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub duration: Duration,
}

/// Step executor with cached providers and event emission
#[derive(Clone)]
pub struct StepExecutor {
    providers: Arc<ProviderRegistry>,
    tools: Arc<ToolRegistry>,
    resolver: Arc<TemplateResolver>,
    observer: Arc<Observer>,
    /// Lowest priority (environment, config file, built-ins)
    defaults: LlmSettings,
    /// Highest priority (command line)
    overrides: LlmSettings,
    retry: RetryPolicy,
    generators: Arc<DashMap<String, Arc<dyn TextGenerator>>>,
}

impl StepExecutor {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        tools: Arc<ToolRegistry>,
        observer: Arc<Observer>,
    ) -> Self {
        Self {
            providers,
            tools,
            resolver: Arc::new(TemplateResolver::new()),
            observer,
            defaults: LlmSettings::default(),
            overrides: LlmSettings::default(),
            retry: RetryPolicy::default(),
            generators: Arc::new(DashMap::new()),
        }
    }

    pub fn with_llm_defaults(mut self, defaults: LlmSettings) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_llm_overrides(mut self, overrides: LlmSettings) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self.generators.clear();
        self
    }

    /// Merge command line → step → workflow → defaults
    pub fn generation_config(
        &self,
        step: &ValidatedStep,
        global: &GlobalConfig,
    ) -> Result<GenerationConfig> {
        let base = global.llm.merged_over(&self.defaults);
        let merged = match &step.config.llm {
            Some(step_llm) => self.overrides.merged_over(&step_llm.merged_over(&base)),
            None => self.overrides.merged_over(&base),
        };

        let (Some(provider), Some(model)) = (merged.provider, merged.model) else {
            return Err(FlowlineError::LlmConfig {
                reason: "no provider/model configured; set config.llm or pass --provider/--model"
                    .to_string(),
            });
        };
        if let Some(t) = merged.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(FlowlineError::LlmConfig {
                    reason: format!("temperature {} is outside 0.0..=2.0", t),
                });
            }
        }

        Ok(GenerationConfig {
            provider,
            model,
            temperature: merged.temperature,
            max_tokens: merged.max_tokens,
            base_url: merged.base_url,
        })
    }

    /// Get or create the retry-wrapped provider (atomic via DashMap entry API)
    fn generator(&self, name: &str) -> Result<Arc<dyn TextGenerator>> {
        use dashmap::mapref::entry::Entry;

        match self.generators.entry(name.to_string()) {
            Entry::Occupied(e) => Ok(Arc::clone(e.get())),
            Entry::Vacant(e) => {
                let inner = self.providers.get(name)?;
                let wrapped: Arc<dyn TextGenerator> =
                    Arc::new(RetryingGenerator::new(inner, self.retry.clone()));
                e.insert(Arc::clone(&wrapped));
                Ok(wrapped)
            }
        }
    }

    /// Resolve provider, tools and timeout without calling anything
    pub fn prepare(&self, step: &ValidatedStep, global: &GlobalConfig) -> Result<PreparedStep> {
        self.prepare_inner(step, global)
            .map_err(|e| e.in_step(step.id()))
    }

    fn prepare_inner(&self, step: &ValidatedStep, global: &GlobalConfig) -> Result<PreparedStep> {
        let config = self.generation_config(step, global)?;
        let generator = self.generator(&config.provider)?;

        let tools = step
            .config
            .tools
            .iter()
            .map(|name| self.tools.resolve_tool(name))
            .collect::<Result<Vec<_>>>()?;
        if !tools.is_empty() && !generator.supports_tools() {
            return Err(FlowlineError::UnsupportedFeature {
                feature: "tools".to_string(),
                reason: format!("provider '{}' cannot call tools", config.provider),
            });
        }

        let timeout = Duration::from_secs(
            step.config
                .timeout_seconds
                .unwrap_or(global.execution.timeout_seconds),
        );

        Ok(PreparedStep {
            step_id: Arc::from(step.id()),
            generator,
            config,
            tools,
            timeout,
        })
    }

    /// Prepare and run in one go
    pub async fn execute(
        &self,
        step: &ValidatedStep,
        state: &RuntimeState,
        global: &GlobalConfig,
    ) -> Result<StepOutcome> {
        let prepared = self.prepare(step, global)?;
        self.run_prepared(step, &prepared, state).await
    }

    /// Execute a prepared step; `state` is never modified
    #[instrument(skip_all, fields(step = %prepared.step_id, provider = %prepared.config.provider))]
    pub async fn run_prepared(
        &self,
        step: &ValidatedStep,
        prepared: &PreparedStep,
        state: &RuntimeState,
    ) -> Result<StepOutcome> {
        self.run_inner(step, prepared, state)
            .await
            .map_err(|e| e.in_step(step.id()))
    }

    async fn run_inner(
        &self,
        step: &ValidatedStep,
        prepared: &PreparedStep,
        state: &RuntimeState,
    ) -> Result<StepOutcome> {
        let started = Instant::now();
        let step_id = &prepared.step_id;

        let inputs = self
            .resolver
            .resolve_inputs(&step.config.inputs, state.record())?;
        for (name, template) in step.config.inputs.iter() {
            if let Some(result) = inputs.get(name) {
                self.observer.emit(EventKind::TemplateResolved {
                    step_id: Arc::clone(step_id),
                    template: template.clone(),
                    result: result.clone(),
                });
            }
        }

        let prompt = self
            .resolver
            .resolve(&step.config.prompt, &inputs, state.record())?;
        self.observer.emit(EventKind::TemplateResolved {
            step_id: Arc::clone(step_id),
            template: step.config.prompt.clone(),
            result: prompt.clone(),
        });

        let request = GenerationRequest::new(
            prompt,
            Arc::clone(&step.output_schema),
            prepared.config.clone(),
        )
        .with_tools(prepared.tools.clone());

        self.observer.emit(EventKind::ProviderCalled {
            step_id: Arc::clone(step_id),
            provider: prepared.config.provider.clone(),
            model: prepared.config.model.clone(),
            prompt_len: request.prompt.len(),
            tools: request.tool_names().into_iter().map(String::from).collect(),
        });
        debug!(model = %prepared.config.model, "calling provider");

        let call_started = Instant::now();
        let generation =
            tokio::time::timeout(prepared.timeout, prepared.generator.generate(&request))
                .await
                .map_err(|_| FlowlineError::Timeout {
                    step_id: step_id.to_string(),
                    timeout_ms: prepared.timeout.as_millis() as u64,
                })??;

        let cost_usd = generation.usage.estimate_cost_usd(&prepared.config.model);
        self.observer.emit(EventKind::ProviderResponded {
            step_id: Arc::clone(step_id),
            raw: generation.raw.clone(),
            prompt_tokens: generation.usage.prompt_tokens,
            completion_tokens: generation.usage.completion_tokens,
            cost_usd,
            duration_ms: call_started.elapsed().as_millis() as u64,
        });

        let next = state.with_outputs(&generation.record, &step.config.outputs)?;

        Ok(StepOutcome {
            state: next,
            output: generation.record,
            usage: generation.usage,
            cost_usd,
            duration: started.elapsed(),
        })
    }
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("providers", &self.providers)
            .field("tools", &self.tools)
            .field("defaults", &self.defaults)
            .field("overrides", &self.overrides)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::WorkflowConfig;
    use crate::event::EventLog;
    use crate::provider::MockProvider;
    use crate::tools::FnTool;
    use crate::validate::{validate, ValidatedWorkflow};
    use serde_json::{json, Map};

    const YAML: &str = r#"
schema_version: "1.0"
flow: {name: brief}
state:
  fields:
    topic: {type: str, required: true}
    summary: {type: str}
nodes:
  - id: summarize
    prompt: "Summarize {subject} in one line"
    inputs: {subject: "{topic}"}
    outputs: [summary]
    output_schema: str
edges:
  - {from: START, to: summarize}
  - {from: summarize, to: END}
"#;

    fn workflow(yaml: &str) -> ValidatedWorkflow {
        validate(WorkflowConfig::parse(yaml).unwrap()).unwrap()
    }

    fn executor(mock: MockProvider, log: &EventLog) -> StepExecutor {
        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(mock));
        let mut observer = Observer::new();
        observer.attach(Arc::new(log.clone()));
        StepExecutor::new(
            Arc::new(providers),
            Arc::new(ToolRegistry::new()),
            Arc::new(observer),
        )
        .with_llm_defaults(LlmSettings {
            provider: Some("mock".into()),
            model: Some("mock-1".into()),
            ..Default::default()
        })
        .with_retry_policy(RetryPolicy::none())
    }

    fn initial(workflow: &ValidatedWorkflow) -> RuntimeState {
        let mut inputs = Map::new();
        inputs.insert("topic".into(), json!("rust"));
        RuntimeState::initialize(workflow.state_schema(), inputs).unwrap()
    }

    #[tokio::test]
    async fn test_execute_updates_only_declared_outputs() {
        let log = EventLog::new();
        let mock = MockProvider::new();
        mock.queue_json(json!({"summary": "Rust in a line"}));
        let exec = executor(mock, &log);
        let wf = workflow(YAML);
        let state = initial(&wf);

        let outcome = exec
            .execute(&wf.steps()[0], &state, &wf.config().config)
            .await
            .unwrap();

        assert_eq!(outcome.state.get("summary"), Some(&json!("Rust in a line")));
        assert_eq!(outcome.state.get("topic"), Some(&json!("rust")));
        assert_eq!(state.get("summary"), Some(&json!("")));

        let resolved: Vec<String> = log
            .events()
            .into_iter()
            .filter_map(|e| match e.kind {
                EventKind::TemplateResolved { result, .. } => Some(result),
                _ => None,
            })
            .collect();
        assert_eq!(resolved, vec!["rust", "Summarize rust in one line"]);
    }

    #[tokio::test]
    async fn test_invalid_output_is_step_error() {
        let log = EventLog::new();
        let mock = MockProvider::new();
        mock.queue_json(json!({"summary": 42}));
        let exec = executor(mock, &log);
        let wf = workflow(YAML);

        let err = exec
            .execute(&wf.steps()[0], &initial(&wf), &wf.config().config)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "StepExecutionError");
        assert_eq!(err.step_id(), Some("summarize"));
        assert_eq!(err.root_cause().kind(), "LLMAPIError");
    }

    #[test]
    fn test_generation_config_priority() {
        let log = EventLog::new();
        let exec = executor(MockProvider::new(), &log).with_llm_overrides(LlmSettings {
            model: Some("cli-model".into()),
            ..Default::default()
        });
        let yaml = YAML.replace(
            "    output_schema: str\n",
            "    output_schema: str\n    llm: {model: step-model, temperature: 0.3}\n",
        );
        let wf = workflow(&yaml);

        let config = exec
            .generation_config(&wf.steps()[0], &wf.config().config)
            .unwrap();
        assert_eq!(config.provider, "mock");
        assert_eq!(config.model, "cli-model");
        assert_eq!(config.temperature, Some(0.3));
    }

    #[test]
    fn test_temperature_out_of_range() {
        let log = EventLog::new();
        let exec = executor(MockProvider::new(), &log);
        let yaml = YAML.replace(
            "    output_schema: str\n",
            "    output_schema: str\n    llm: {temperature: 3.5}\n",
        );
        let wf = workflow(&yaml);
        let err = exec
            .generation_config(&wf.steps()[0], &wf.config().config)
            .unwrap_err();
        assert_eq!(err.code(), "FLOW-060");
    }

    #[test]
    fn test_prepare_rejects_unknown_tool() {
        let log = EventLog::new();
        let exec = executor(MockProvider::new(), &log);
        let yaml = YAML.replace(
            "    output_schema: str\n",
            "    output_schema: str\n    tools: [search]\n",
        );
        let wf = workflow(&yaml);
        let err = exec.prepare(&wf.steps()[0], &wf.config().config).unwrap_err();
        assert_eq!(err.root_cause().kind(), "ToolNotFoundError");
    }

    #[test]
    fn test_prepare_rejects_tools_without_support() {
        let mut tools = ToolRegistry::new();
        tools.register(FnTool::new("search", "Search", json!({}), |_| Ok(json!([]))));
        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(MockProvider::new().without_tools()));
        let exec = StepExecutor::new(
            Arc::new(providers),
            Arc::new(tools),
            Arc::new(Observer::new()),
        )
        .with_llm_defaults(LlmSettings {
            provider: Some("mock".into()),
            model: Some("m".into()),
            ..Default::default()
        });

        let yaml = YAML.replace(
            "    output_schema: str\n",
            "    output_schema: str\n    tools: [search]\n",
        );
        let wf = workflow(&yaml);
        let err = exec.prepare(&wf.steps()[0], &wf.config().config).unwrap_err();
        assert_eq!(err.root_cause().code(), "FLOW-012");
    }

    #[test]
    fn test_step_timeout_overrides_global() {
        let log = EventLog::new();
        let exec = executor(MockProvider::new(), &log);
        let yaml = YAML.replace(
            "    output_schema: str\n",
            "    output_schema: str\n    timeout_seconds: 7\n",
        );
        let wf = workflow(&yaml);
        let prepared = exec.prepare(&wf.steps()[0], &wf.config().config).unwrap();
        assert_eq!(prepared.timeout, Duration::from_secs(7));

        let wf = workflow(YAML);
        let prepared = exec.prepare(&wf.steps()[0], &wf.config().config).unwrap();
        assert_eq!(
            prepared.timeout.as_secs(),
            wf.config().config.execution.timeout_seconds
        );
    }
}
