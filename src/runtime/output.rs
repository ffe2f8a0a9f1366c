//! Run output - final state plus metrics

use serde::Serialize;
use serde_json::{Map, Value};

use crate::provider::TokenUsage;

/// Result of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub run_id: String,
    pub workflow: String,
    /// Final state, flattened to plain values
    pub state: Map<String, Value>,
    pub metrics: RunMetrics,
}

impl RunOutput {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.state.get(field)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMetrics {
    pub duration_ms: u64,
    pub step_count: usize,
    pub usage: TokenUsage,
    /// Sum of the per-step estimates
    pub cost_usd: f64,
    pub steps: Vec<StepMetrics>,
}

impl RunMetrics {
    pub fn record(&mut self, step: StepMetrics) {
        self.usage.add(step.usage);
        self.cost_usd += step.cost_usd;
        self.step_count += 1;
        self.steps.push(step);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepMetrics {
    pub step_id: String,
    pub provider: String,
    pub model: String,
    pub duration_ms: u64,
    pub usage: TokenUsage,
    pub cost_usd: f64,
}
