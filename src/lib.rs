//! Flowline - declarative, type-checked linear LLM workflows
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  ast/       YAML → WorkflowConfig, type strings, descriptors │
//! │  record/    Record schemas built from declared fields        │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      APPLICATION LAYER                       │
//! │  validate/  Fail-fast cross-reference checks                 │
//! │  dag/       FlowGraph (cycles, reachability, linear order)   │
//! │  binding/   Prompt templates against state                   │
//! │  runtime/   Pipeline, StepExecutor, RuntimeState             │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    INFRASTRUCTURE LAYER                      │
//! │  provider/  Text generation (openai, mock) + retry wrapper   │
//! │  tools/     Tool trait and registry                          │
//! │  event/     Event log and observability sinks                │
//! │  resilience/ Retry with exponential backoff                  │
//! │  util/      Constants, identifiers, suggestions              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`ast`] | Document parsing, `parse_type`, named types, compatibility |
//! | [`record`] | `build_record_type`, `Record` construction and updates |
//! | [`validate`] | Every check before anything runs, all issues at once |
//! | [`dag`] | Graph over `START ∪ steps ∪ END` with FxHashMap |
//! | [`binding`] | Template tokenizer (cached), resolution with suggestions |
//! | [`runtime`] | Phase state machine and step execution |
//! | [`provider`] | `TextGenerator` trait, OpenAI-compatible and mock backends |
//! | [`tools`] | Explicit tool registry |
//! | [`event`] | Append-only event log, sink fan-out with failure isolation |
//! | [`config`] | User config file and environment |
//! | [`error`] | Error types with codes and fix suggestions |

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL - YAML → Rust types
// ═══════════════════════════════════════════════════════════════
pub mod ast;
pub mod record;

// ═══════════════════════════════════════════════════════════════
// APPLICATION LAYER - Validation and execution
// ═══════════════════════════════════════════════════════════════
pub mod binding;
pub mod dag;
pub mod runtime;
pub mod validate;

// ═══════════════════════════════════════════════════════════════
// INFRASTRUCTURE LAYER - Providers, tools, events
// ═══════════════════════════════════════════════════════════════
pub mod event;
pub mod provider;
pub mod resilience;
pub mod tools;
pub mod util;

// ═══════════════════════════════════════════════════════════════
// CROSS-CUTTING - Error handling, configuration
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod error;

// ═══════════════════════════════════════════════════════════════
// PUBLIC API RE-EXPORTS
// ═══════════════════════════════════════════════════════════════

// Error types
pub use error::{FixSuggestion, FlowlineError, Result};

// Config types
pub use config::{mask_api_key, FlowlineConfig};

// Domain model
pub use ast::{parse_type, LlmSettings, ObjectField, StepConfig, TypeDescriptor, WorkflowConfig};
pub use record::{build_record_type, Record, RecordBuildError, RecordMode, RecordSchema};

// Application layer
pub use binding::TemplateResolver;
pub use dag::FlowGraph;
pub use runtime::{Phase, Pipeline, PipelineOptions, RunOutput, RuntimeState, StepExecutor};
pub use validate::{validate, ValidatedWorkflow, ValidationCheck, ValidationIssue};

// Infrastructure
pub use event::{Event, EventKind, EventLog, ObservabilitySink, Observer};
pub use provider::{MockProvider, OpenAiProvider, ProviderRegistry, TextGenerator};
pub use tools::{FnTool, Tool, ToolRegistry};
