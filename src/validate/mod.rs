//! Config Validator
//!
//! Everything the structural schema cannot see, checked before any step runs:
//!
//! | check | what |
//! |---|---|
//! | identifiers | unique, well-formed step ids; field/type/input names |
//! | type-parse | every type string parses (named types, cycles) |
//! | edge-references | edge endpoints are START, END or a step |
//! | output-names | step outputs are declared state fields |
//! | output-schema | output schema fields == declared outputs |
//! | type-compatibility | output field types assign to state field types |
//! | placeholders | `{var}` in prompts and inputs resolve |
//! | linear-flow | one simple path START → … → END |
//! | connectivity | every step reachable from START and reaching END |
//!
//! All issues are collected; graph checks are skipped when edges reference
//! unknown nodes. A valid workflow becomes a `ValidatedWorkflow` carrying the
//! built record types and the execution order.

mod checks;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::ast::{ObjectField, StepConfig, WorkflowConfig};
use crate::error::FlowlineError;
use crate::record::{build_record_type, pascal_case, RecordMode, RecordSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationCheck {
    Identifiers,
    TypeParse,
    EdgeReferences,
    OutputNames,
    OutputSchema,
    TypeCompatibility,
    Placeholders,
    LinearFlow,
    Connectivity,
}

impl ValidationCheck {
    pub fn label(self) -> &'static str {
        match self {
            Self::Identifiers => "identifiers",
            Self::TypeParse => "type-parse",
            Self::EdgeReferences => "edge-references",
            Self::OutputNames => "output-names",
            Self::OutputSchema => "output-schema",
            Self::TypeCompatibility => "type-compatibility",
            Self::Placeholders => "placeholders",
            Self::LinearFlow => "linear-flow",
            Self::Connectivity => "connectivity",
        }
    }
}

impl fmt::Display for ValidationCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One validation finding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub check: ValidationCheck,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn new(check: ValidationCheck, message: impl Into<String>) -> Self {
        Self {
            check,
            message: message.into(),
            step: None,
            field: None,
            suggestion: None,
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: Option<String>) -> Self {
        self.suggestion = suggestion;
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.check)?;
        if let Some(step) = &self.step {
            write!(f, "step '{}': ", step)?;
        }
        f.write_str(&self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (did you mean '{}'?)", suggestion)?;
        }
        Ok(())
    }
}

/// A step whose references and types have been checked
#[derive(Debug, Clone)]
pub struct ValidatedStep {
    pub config: StepConfig,
    pub output_fields: Vec<ObjectField>,
    pub output_schema: Arc<RecordSchema>,
}

impl ValidatedStep {
    pub fn id(&self) -> &str {
        &self.config.id
    }
}

/// Workflow that passed every check; read-only from here on
#[derive(Debug, Clone)]
pub struct ValidatedWorkflow {
    config: Arc<WorkflowConfig>,
    state_fields: Vec<ObjectField>,
    state_schema: Arc<RecordSchema>,
    steps: Vec<ValidatedStep>,
}

impl ValidatedWorkflow {
    pub fn config(&self) -> &Arc<WorkflowConfig> {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.flow.name
    }

    pub fn state_fields(&self) -> &[ObjectField] {
        &self.state_fields
    }

    pub fn state_schema(&self) -> &Arc<RecordSchema> {
        &self.state_schema
    }

    /// Steps in execution order (START → END)
    pub fn steps(&self) -> &[ValidatedStep] {
        &self.steps
    }
}

/// Run every check; on success build the state and output record types
pub fn validate(config: WorkflowConfig) -> Result<ValidatedWorkflow, FlowlineError> {
    let mut report = checks::run_all(&config);

    if !report.issues.is_empty() {
        info!(
            flow = %config.flow.name,
            issues = report.issues.len(),
            "workflow rejected"
        );
        return Err(FlowlineError::ConfigValidation {
            issues: report.issues,
        });
    }

    let state_schema = build_record_type(&report.state_fields, "State", RecordMode::State)?;

    let mut steps = Vec::with_capacity(report.order.len());
    for id in &report.order {
        let (index, output_fields) = report
            .outputs
            .iter_mut()
            .find(|(i, _)| config.nodes[*i].id == *id)
            .map(|(i, fields)| (*i, std::mem::take(fields)))
            .ok_or_else(|| FlowlineError::ParseError {
                details: format!("step '{}' vanished during validation", id),
            })?;
        let step = &config.nodes[index];
        let output_schema = build_record_type(
            &output_fields,
            &format!("{}Output", pascal_case(&step.id)),
            RecordMode::Output,
        )?;
        steps.push(ValidatedStep {
            config: step.clone(),
            output_fields,
            output_schema,
        });
    }

    debug!(
        flow = %config.flow.name,
        order = ?report.order,
        "workflow validated"
    );

    Ok(ValidatedWorkflow {
        config: Arc::new(config),
        state_fields: report.state_fields,
        state_schema,
        steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_display() {
        let issue = ValidationIssue::new(ValidationCheck::EdgeReferences, "unknown node 'ech'")
            .with_step("echo")
            .with_suggestion(Some("echo".to_string()));
        assert_eq!(
            issue.to_string(),
            "[edge-references] step 'echo': unknown node 'ech' (did you mean 'echo'?)"
        );
    }

    #[test]
    fn test_issue_serializes_without_empty_fields() {
        let issue = ValidationIssue::new(ValidationCheck::LinearFlow, "cycle");
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["check"], "linear-flow");
        assert!(json.get("step").is_none());
    }
}
