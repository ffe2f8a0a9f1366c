//! Runtime Module - workflow execution
//!
//! Contains the runtime execution components:
//! - `runner`: `Pipeline` lifecycle (validate, build, run)
//! - `executor`: one step against the current state
//! - `state`: immutable runtime state and input coercion
//! - `output`: final state and run metrics
//!
//! This module represents the "how" - runtime execution.
//! For static structure, see the `ast` and `validate` modules.

mod executor;
mod output;
mod runner;
mod state;

pub use executor::{PreparedStep, StepExecutor, StepOutcome};
pub use output::{RunMetrics, RunOutput, StepMetrics};
pub use runner::{Phase, Pipeline, PipelineOptions, SEQUENTIAL_MODE};
pub use state::{coerce_inputs, parse_input_pair, RuntimeState};
