//! Flowline error types with error codes
//!
//! Error code ranges:
//! - FLOW-000-009: Document loading (ConfigLoadError)
//! - FLOW-010-029: Config validation (ConfigValidationError)
//! - FLOW-030-039: Record building / state initialization
//! - FLOW-040-049: Template resolution
//! - FLOW-050-059: Tools
//! - FLOW-060-079: LLM configuration and calls
//! - FLOW-080-089: Step / workflow execution
//! - FLOW-090-099: IO and user configuration

use thiserror::Error;

use crate::ast::schema_validator::SchemaError;
use crate::ast::TypeParseError;
use crate::binding::TemplateError;
use crate::provider::LlmError;
use crate::record::RecordBuildError;
use crate::validate::ValidationIssue;

pub type Result<T> = std::result::Result<T, FlowlineError>;

fn format_schema_errors(errors: &[SchemaError]) -> String {
    match errors {
        [] => "no errors".to_string(),
        [single] => format!("[{}] {}", single.path, single.message),
        many => format!(
            "{} errors: {}",
            many.len(),
            many.iter()
                .map(|e| format!("[{}] {}", e.path, e.message))
                .collect::<Vec<_>>()
                .join("; ")
        ),
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    suggestion
        .as_deref()
        .map(|s| format!(" (did you mean '{}'?)", s))
        .unwrap_or_default()
}

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum FlowlineError {
    // ═══════════════════════════════════════════
    // LOAD ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[FLOW-001] Failed to parse workflow: {details}")]
    ParseError { details: String },

    #[error("[FLOW-002] Unsupported schema_version '{found}' (expected '{expected}')")]
    UnsupportedSchemaVersion { found: String, expected: String },

    #[error("[FLOW-003] Workflow file not found: {path}")]
    WorkflowNotFound { path: String },

    #[error("[FLOW-004] Document structure invalid: {}", format_schema_errors(.errors))]
    SchemaValidationFailed { errors: Vec<SchemaError> },

    #[error("[FLOW-005] YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("[FLOW-006] JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    // ═══════════════════════════════════════════
    // VALIDATION ERRORS (010-029)
    // ═══════════════════════════════════════════
    #[error("[FLOW-010] Workflow validation failed with {} issue(s): {}", .issues.len(), format_issues(.issues))]
    ConfigValidation { issues: Vec<ValidationIssue> },

    #[error("[FLOW-011] {0}")]
    TypeParse(#[from] TypeParseError),

    #[error("[FLOW-012] Unsupported feature '{feature}': {reason}")]
    UnsupportedFeature { feature: String, reason: String },

    // ═══════════════════════════════════════════
    // RECORD / STATE ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[FLOW-030] {0}")]
    RecordBuild(#[from] RecordBuildError),

    #[error("[FLOW-031] Missing required input(s): {}", .missing.join(", "))]
    StateInitialization { missing: Vec<String> },

    #[error("[FLOW-032] Invalid input '{raw}': {reason}")]
    InvalidInput { raw: String, reason: String },

    // ═══════════════════════════════════════════
    // TEMPLATE ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[FLOW-040] {0}")]
    Template(#[from] TemplateError),

    // ═══════════════════════════════════════════
    // TOOL ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[FLOW-050] Tool '{name}' is not registered{}", suggestion_suffix(.suggestion))]
    ToolNotFound {
        name: String,
        suggestion: Option<String>,
        available: Vec<String>,
    },

    // ═══════════════════════════════════════════
    // LLM ERRORS (060-079)
    // ═══════════════════════════════════════════
    #[error("[FLOW-060] LLM configuration error: {reason}")]
    LlmConfig { reason: String },

    #[error("[FLOW-061] {0}")]
    LlmApi(#[from] LlmError),

    // ═══════════════════════════════════════════
    // EXECUTION ERRORS (080-089)
    // ═══════════════════════════════════════════
    #[error("[FLOW-080] Step '{step_id}' failed: {source}")]
    StepExecution {
        step_id: String,
        #[source]
        source: Box<FlowlineError>,
    },

    #[error("[FLOW-081] Step '{step_id}' timed out after {timeout_ms}ms")]
    Timeout { step_id: String, timeout_ms: u64 },

    #[error("[FLOW-082] Workflow '{workflow}' (run {run_id}) failed while {phase}: {source}")]
    WorkflowExecution {
        workflow: String,
        run_id: String,
        phase: String,
        #[source]
        source: Box<FlowlineError>,
    },

    #[error("[FLOW-083] Pipeline cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    // ═══════════════════════════════════════════
    // IO / CONFIG ERRORS (090-099)
    // ═══════════════════════════════════════════
    #[error("[FLOW-090] IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[FLOW-091] Config error: {reason}")]
    ConfigError { reason: String },
}

impl FlowlineError {
    /// Get the error code (e.g., "FLOW-001")
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "FLOW-001",
            Self::UnsupportedSchemaVersion { .. } => "FLOW-002",
            Self::WorkflowNotFound { .. } => "FLOW-003",
            Self::SchemaValidationFailed { .. } => "FLOW-004",
            Self::YamlParse(_) => "FLOW-005",
            Self::JsonError(_) => "FLOW-006",
            Self::ConfigValidation { .. } => "FLOW-010",
            Self::TypeParse(_) => "FLOW-011",
            Self::UnsupportedFeature { .. } => "FLOW-012",
            Self::RecordBuild(_) => "FLOW-030",
            Self::StateInitialization { .. } => "FLOW-031",
            Self::InvalidInput { .. } => "FLOW-032",
            Self::Template(_) => "FLOW-040",
            Self::ToolNotFound { .. } => "FLOW-050",
            Self::LlmConfig { .. } => "FLOW-060",
            Self::LlmApi(_) => "FLOW-061",
            Self::StepExecution { .. } => "FLOW-080",
            Self::Timeout { .. } => "FLOW-081",
            Self::WorkflowExecution { .. } => "FLOW-082",
            Self::InvalidTransition { .. } => "FLOW-083",
            Self::Io(_) => "FLOW-090",
            Self::ConfigError { .. } => "FLOW-091",
        }
    }

    /// Taxonomy name reported to users ("ConfigValidationError", ...)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ParseError { .. }
            | Self::UnsupportedSchemaVersion { .. }
            | Self::WorkflowNotFound { .. }
            | Self::SchemaValidationFailed { .. }
            | Self::YamlParse(_)
            | Self::JsonError(_)
            | Self::Io(_)
            | Self::ConfigError { .. } => "ConfigLoadError",
            Self::ConfigValidation { .. }
            | Self::TypeParse(_)
            | Self::UnsupportedFeature { .. } => "ConfigValidationError",
            Self::RecordBuild(_) => "RecordBuildError",
            Self::StateInitialization { .. } | Self::InvalidInput { .. } => {
                "StateInitializationError"
            }
            Self::Template(_) => "TemplateResolutionError",
            Self::ToolNotFound { .. } => "ToolNotFoundError",
            Self::LlmConfig { .. } => "LLMConfigError",
            Self::LlmApi(_) => "LLMAPIError",
            Self::StepExecution { .. } => "StepExecutionError",
            Self::Timeout { .. } => "TimeoutError",
            Self::WorkflowExecution { .. } | Self::InvalidTransition { .. } => {
                "WorkflowExecutionError"
            }
        }
    }

    /// Errors raised before any external call can happen
    pub fn is_validation_stage(&self) -> bool {
        match self {
            Self::WorkflowExecution { source, .. } | Self::StepExecution { source, .. } => {
                source.is_validation_stage()
            }
            Self::Timeout { .. }
            | Self::LlmApi(_)
            | Self::Template(_)
            | Self::InvalidTransition { .. } => false,
            _ => true,
        }
    }

    /// Check if error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::LlmApi(e) => e.is_retryable(),
            Self::Timeout { .. } => true,
            Self::StepExecution { source, .. } | Self::WorkflowExecution { source, .. } => {
                source.is_recoverable()
            }
            _ => false,
        }
    }

    /// Walk through step/workflow wrappers to the originating error
    pub fn root_cause(&self) -> &FlowlineError {
        match self {
            Self::StepExecution { source, .. } | Self::WorkflowExecution { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// Step that failed, if the error happened inside a step
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::StepExecution { step_id, .. } | Self::Timeout { step_id, .. } => Some(step_id),
            Self::WorkflowExecution { source, .. } => source.step_id(),
            _ => None,
        }
    }

    /// Nearest-match suggestion carried by name-reference errors
    pub fn suggestion(&self) -> Option<&str> {
        match self.root_cause() {
            Self::ConfigValidation { issues } => {
                issues.iter().find_map(|i| i.suggestion.as_deref())
            }
            Self::ToolNotFound { suggestion, .. } => suggestion.as_deref(),
            Self::Template(e) => e.suggestion(),
            Self::TypeParse(e) => e.suggestion(),
            _ => None,
        }
    }

    /// Wrap an error with step context
    pub fn in_step(self, step_id: impl Into<String>) -> Self {
        match self {
            already @ (Self::StepExecution { .. } | Self::Timeout { .. }) => already,
            other => Self::StepExecution {
                step_id: step_id.into(),
                source: Box::new(other),
            },
        }
    }
}

impl FixSuggestion for FlowlineError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            FlowlineError::ParseError { .. } | FlowlineError::YamlParse(_) => {
                Some("Check YAML syntax: indentation and quoting")
            }
            FlowlineError::JsonError(_) => Some("Check JSON syntax"),
            FlowlineError::UnsupportedSchemaVersion { .. } => {
                Some("Set schema_version: \"1.0\" at the top of the workflow")
            }
            FlowlineError::WorkflowNotFound { .. } => Some("Check the file path exists"),
            FlowlineError::SchemaValidationFailed { .. } => {
                Some("Compare the document against the workflow format (flow, state, nodes, edges)")
            }
            FlowlineError::ConfigValidation { .. } => {
                Some("Fix the listed issues; nothing was executed")
            }
            FlowlineError::TypeParse(_) => {
                Some("Use str, int, float, bool, list[T], dict[K,V] or object with fields")
            }
            FlowlineError::UnsupportedFeature { .. } => {
                Some("Only sequential, linear workflows are supported")
            }
            FlowlineError::RecordBuild(_) => {
                Some("Check field types, defaults and required flags in the schema")
            }
            FlowlineError::StateInitialization { .. } => {
                Some("Pass the missing values with --input name=value or declare a default")
            }
            FlowlineError::InvalidInput { .. } => Some("Use --input name=value"),
            FlowlineError::Template(_) => {
                Some("Reference a state field or an inputs: key as {name} or {name.field}")
            }
            FlowlineError::ToolNotFound { .. } => {
                Some("Register the tool or remove it from the step's tools list")
            }
            FlowlineError::LlmConfig { .. } => {
                Some("Set the API key env var (OPENAI_API_KEY) or choose another provider")
            }
            FlowlineError::LlmApi(_) => Some("Check API key, model name and provider availability"),
            FlowlineError::StepExecution { source, .. }
            | FlowlineError::WorkflowExecution { source, .. } => source.fix_suggestion(),
            FlowlineError::Timeout { .. } => {
                Some("Increase config.execution.timeout_seconds or the step's timeout_seconds")
            }
            FlowlineError::InvalidTransition { .. } => {
                Some("Build the pipeline with Pipeline::load before running it")
            }
            FlowlineError::Io(_) => Some("Check file path and permissions"),
            FlowlineError::ConfigError { .. } => {
                Some("Check ~/.config/flowline/config.toml for syntax errors")
            }
        }
    }
}
