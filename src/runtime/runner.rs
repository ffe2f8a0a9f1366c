//! Pipeline - lifecycle of one workflow run
//!
//! `Loaded → Validated → GraphBuilt → Running → Succeeded`, with `Failed`
//! reachable from every non-terminal phase. Validation and the feature gate
//! both finish before any provider is called.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::ast::{LlmSettings, WorkflowConfig};
use crate::error::{FlowlineError, Result};
use crate::event::{EventKind, EventLog, ObservabilitySink, Observer};
use crate::provider::ProviderRegistry;
use crate::resilience::{RetryConfig, RetryPolicy};
use crate::tools::ToolRegistry;
use crate::validate::ValidatedWorkflow;

use super::executor::{PreparedStep, StepExecutor};
use super::output::{RunMetrics, RunOutput, StepMetrics};
use super::state::RuntimeState;

/// Only execution mode currently supported
pub const SEQUENTIAL_MODE: &str = "sequential";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Loaded,
    Validated,
    GraphBuilt,
    Running,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Loaded, Validated)
                | (Validated, GraphBuilt)
                | (GraphBuilt, Running)
                | (Running, Succeeded)
                | (Loaded | Validated | GraphBuilt | Running, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Loaded => "loaded",
            Phase::Validated => "validated",
            Phase::GraphBuilt => "graph_built",
            Phase::Running => "running",
            Phase::Succeeded => "succeeded",
            Phase::Failed => "failed",
        }
    }

    /// What the pipeline is doing while it sits in this phase
    fn activity(self) -> &'static str {
        match self {
            Phase::Loaded => "validating",
            Phase::Validated => "building the execution graph",
            Phase::GraphBuilt => "initializing state",
            Phase::Running => "running steps",
            Phase::Succeeded | Phase::Failed => "finishing",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registries and overrides shared by every pipeline of a process
#[derive(Clone)]
pub struct PipelineOptions {
    pub providers: Arc<ProviderRegistry>,
    pub tools: Arc<ToolRegistry>,
    /// Environment / config file / built-in LLM settings
    pub llm_defaults: LlmSettings,
    /// Command-line LLM settings
    pub llm_overrides: LlmSettings,
    /// Extra sinks attached next to the configured one
    pub sinks: Vec<Arc<dyn ObservabilitySink>>,
}

impl PipelineOptions {
    pub fn new(providers: ProviderRegistry) -> Self {
        Self {
            providers: Arc::new(providers),
            tools: Arc::new(ToolRegistry::new()),
            llm_defaults: LlmSettings::default(),
            llm_overrides: LlmSettings::default(),
            sinks: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn with_llm_defaults(mut self, defaults: LlmSettings) -> Self {
        self.llm_defaults = defaults;
        self
    }

    pub fn with_llm_overrides(mut self, overrides: LlmSettings) -> Self {
        self.llm_overrides = overrides;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl std::fmt::Debug for PipelineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOptions")
            .field("providers", &self.providers)
            .field("tools", &self.tools)
            .field("llm_defaults", &self.llm_defaults)
            .field("llm_overrides", &self.llm_overrides)
            .field("sinks", &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Sequential workflow pipeline with event sourcing
pub struct Pipeline {
    workflow: String,
    run_id: String,
    phase: Phase,
    history: Vec<Phase>,
    failed_in: Option<Phase>,
    loaded: Option<WorkflowConfig>,
    validated: Option<Arc<ValidatedWorkflow>>,
    prepared: Arc<Vec<PreparedStep>>,
    executor: StepExecutor,
    observer: Arc<Observer>,
    event_log: EventLog,
}

impl Pipeline {
    pub fn new(config: WorkflowConfig, options: PipelineOptions) -> Self {
        let event_log = EventLog::new();
        let mut observer = Observer::from_settings(&config.config.observability, &event_log);
        for sink in options.sinks {
            observer.attach(sink);
        }
        let observer = Arc::new(observer);

        let retry = RetryPolicy::new(RetryConfig::from_execution(&config.config.execution));
        let executor = StepExecutor::new(options.providers, options.tools, Arc::clone(&observer))
            .with_llm_defaults(options.llm_defaults)
            .with_llm_overrides(options.llm_overrides)
            .with_retry_policy(retry);

        Self {
            workflow: config.flow.name.clone(),
            run_id: Uuid::new_v4().to_string(),
            phase: Phase::Loaded,
            history: vec![Phase::Loaded],
            failed_in: None,
            loaded: Some(config),
            validated: None,
            prepared: Arc::new(Vec::new()),
            executor,
            observer,
            event_log,
        }
    }

    pub fn from_yaml(text: &str, options: PipelineOptions) -> Result<Self> {
        Ok(Self::new(WorkflowConfig::parse(text)?, options))
    }

    pub fn from_file(path: impl AsRef<Path>, options: PipelineOptions) -> Result<Self> {
        Ok(Self::new(WorkflowConfig::from_file(path)?, options))
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Every phase entered so far, in order
    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    pub fn validated(&self) -> Option<&ValidatedWorkflow> {
        self.validated.as_deref()
    }

    /// In-memory log; filled when `observability.sink` is `log`
    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    fn transition(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(FlowlineError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        debug!(from = %self.phase, to = %next, "pipeline transition");
        self.phase = next;
        self.history.push(next);
        Ok(())
    }

    fn fail(&mut self, err: FlowlineError) -> FlowlineError {
        if !self.phase.is_terminal() {
            self.failed_in = Some(self.phase);
            self.phase = Phase::Failed;
            self.history.push(Phase::Failed);
        }
        err
    }

    /// Run every check; `Loaded → Validated`
    pub fn validate(&mut self) -> Result<&ValidatedWorkflow> {
        if self.phase != Phase::Loaded {
            return Err(FlowlineError::InvalidTransition {
                from: self.phase.to_string(),
                to: Phase::Validated.to_string(),
            });
        }
        let Some(config) = self.loaded.take() else {
            return Err(FlowlineError::InvalidTransition {
                from: self.phase.to_string(),
                to: Phase::Validated.to_string(),
            });
        };

        match crate::validate::validate(config) {
            Ok(validated) => {
                self.validated = Some(Arc::new(validated));
                self.transition(Phase::Validated)?;
                self.validated().ok_or_else(|| FlowlineError::InvalidTransition {
                    from: Phase::Loaded.to_string(),
                    to: Phase::Validated.to_string(),
                })
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Feature gate and provider/tool resolution; `Validated → GraphBuilt`
    pub fn build(&mut self) -> Result<()> {
        let Some(validated) = self.validated.clone().filter(|_| self.phase == Phase::Validated)
        else {
            return Err(FlowlineError::InvalidTransition {
                from: self.phase.to_string(),
                to: Phase::GraphBuilt.to_string(),
            });
        };

        match self.prepare_steps(&validated) {
            Ok(prepared) => {
                self.prepared = Arc::new(prepared);
                self.transition(Phase::GraphBuilt)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn prepare_steps(&self, validated: &ValidatedWorkflow) -> Result<Vec<PreparedStep>> {
        let global = &validated.config().config;
        if global.execution.mode != SEQUENTIAL_MODE {
            return Err(FlowlineError::UnsupportedFeature {
                feature: format!("execution.mode: {}", global.execution.mode),
                reason: format!("only '{}' execution is available", SEQUENTIAL_MODE),
            });
        }

        let prepared = validated
            .steps()
            .iter()
            .map(|step| self.executor.prepare(step, global))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            steps = prepared.len(),
            order = ?prepared.iter().map(|p| p.step_id.as_ref()).collect::<Vec<_>>(),
            "execution graph built"
        );
        Ok(prepared)
    }

    /// Drive the pipeline to completion with the caller's initial inputs
    ///
    /// Earlier phases run first if they have not been entered yet. Every
    /// failure comes back as a `WorkflowExecution` error naming the phase.
    #[instrument(skip_all, fields(workflow = %self.workflow, run_id = %self.run_id))]
    pub async fn run(&mut self, inputs: Map<String, Value>) -> Result<RunOutput> {
        let started = Instant::now();
        let already_finished = self.phase.is_terminal();
        match self.drive(inputs, started).await {
            Ok(output) => Ok(output),
            Err(e) => Err(self.wrap_failure(e, started, !already_finished)),
        }
    }

    async fn drive(&mut self, inputs: Map<String, Value>, started: Instant) -> Result<RunOutput> {
        if self.phase == Phase::Loaded {
            self.validate()?;
        }
        if self.phase == Phase::Validated {
            self.build()?;
        }

        let validated = match (&self.validated, self.phase) {
            (Some(v), Phase::GraphBuilt) => Arc::clone(v),
            _ => {
                return Err(FlowlineError::InvalidTransition {
                    from: self.phase.to_string(),
                    to: Phase::Running.to_string(),
                })
            }
        };
        let prepared = Arc::clone(&self.prepared);

        let mut state = match RuntimeState::initialize(validated.state_schema(), inputs) {
            Ok(state) => state,
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(Phase::Running)?;
        info!(steps = prepared.len(), "starting workflow");
        self.observer.emit(EventKind::WorkflowStarted {
            run_id: self.run_id.clone(),
            workflow: self.workflow.clone(),
            step_count: prepared.len(),
        });

        let mut metrics = RunMetrics::default();
        for (step, prep) in validated.steps().iter().zip(prepared.iter()) {
            let step_started = Instant::now();
            self.observer.emit(EventKind::StepStarted {
                step_id: Arc::clone(&prep.step_id),
            });

            match self.executor.run_prepared(step, prep, &state).await {
                Ok(outcome) => {
                    let duration_ms = outcome.duration.as_millis() as u64;
                    self.observer.emit(EventKind::StepCompleted {
                        step_id: Arc::clone(&prep.step_id),
                        output: outcome.output.to_value(),
                        duration_ms,
                    });
                    info!(step = %prep.step_id, duration_ms, "step completed");
                    metrics.record(StepMetrics {
                        step_id: prep.step_id.to_string(),
                        provider: prep.config.provider.clone(),
                        model: prep.config.model.clone(),
                        duration_ms,
                        usage: outcome.usage,
                        cost_usd: outcome.cost_usd,
                    });
                    state = outcome.state;
                }
                Err(e) => {
                    self.observer.emit(EventKind::StepFailed {
                        step_id: Arc::clone(&prep.step_id),
                        error: e.to_string(),
                        duration_ms: step_started.elapsed().as_millis() as u64,
                    });
                    return Err(self.fail(e));
                }
            }
        }

        metrics.duration_ms = started.elapsed().as_millis() as u64;
        self.observer.emit(EventKind::WorkflowCompleted {
            run_id: self.run_id.clone(),
            duration_ms: metrics.duration_ms,
            step_count: metrics.step_count,
            total_tokens: metrics.usage.total_tokens,
            cost_usd: metrics.cost_usd,
        });
        self.transition(Phase::Succeeded)?;
        info!(
            duration_ms = metrics.duration_ms,
            total_tokens = metrics.usage.total_tokens,
            "workflow completed"
        );

        Ok(RunOutput {
            run_id: self.run_id.clone(),
            workflow: self.workflow.clone(),
            state: state.into_map(),
            metrics,
        })
    }

    /// `emit` is false when the pipeline had already finished before this call
    fn wrap_failure(&mut self, err: FlowlineError, started: Instant, emit: bool) -> FlowlineError {
        let phase = self.failed_in.unwrap_or(self.phase);
        warn!(phase = %phase, error = %err, "workflow failed");
        if emit {
            self.observer.emit(EventKind::WorkflowFailed {
                run_id: self.run_id.clone(),
                error: err.to_string(),
                failed_step: err.step_id().map(Arc::from),
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }
        FlowlineError::WorkflowExecution {
            workflow: self.workflow.clone(),
            run_id: self.run_id.clone(),
            phase: phase.activity().to_string(),
            source: Box::new(err),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("workflow", &self.workflow)
            .field("run_id", &self.run_id)
            .field("phase", &self.phase)
            .field("steps", &self.prepared.len())
            .finish()
    }
}
