//! EventLog - in-memory, append-only record of a run
//!
//! - Event: envelope with id + timestamp + kind
//! - EventKind: workflow-level and step-level variants
//! - EventLog: thread-safe, append-only log

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::sink::ObservabilitySink;

/// Single event in the run log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since the log was created (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // WORKFLOW LEVEL
    // ═══════════════════════════════════════════
    WorkflowStarted {
        run_id: String,
        workflow: String,
        step_count: usize,
    },
    WorkflowCompleted {
        run_id: String,
        duration_ms: u64,
        step_count: usize,
        total_tokens: u32,
        cost_usd: f64,
    },
    WorkflowFailed {
        run_id: String,
        error: String,
        failed_step: Option<Arc<str>>,
        duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // STEP LEVEL
    // ═══════════════════════════════════════════
    StepStarted {
        step_id: Arc<str>,
    },
    TemplateResolved {
        step_id: Arc<str>,
        template: String,
        result: String,
    },
    ProviderCalled {
        step_id: Arc<str>,
        provider: String,
        model: String,
        prompt_len: usize,
        tools: Vec<String>,
    },
    ProviderResponded {
        step_id: Arc<str>,
        raw: String,
        prompt_tokens: u32,
        completion_tokens: u32,
        /// Estimated from the model's price per token
        cost_usd: f64,
        duration_ms: u64,
    },
    StepCompleted {
        step_id: Arc<str>,
        output: Value,
        duration_ms: u64,
    },
    StepFailed {
        step_id: Arc<str>,
        error: String,
        duration_ms: u64,
    },
}

impl EventKind {
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::StepStarted { step_id }
            | Self::TemplateResolved { step_id, .. }
            | Self::ProviderCalled { step_id, .. }
            | Self::ProviderResponded { step_id, .. }
            | Self::StepCompleted { step_id, .. }
            | Self::StepFailed { step_id, .. } => Some(step_id),
            Self::WorkflowStarted { .. }
            | Self::WorkflowCompleted { .. }
            | Self::WorkflowFailed { .. } => None,
        }
    }

    pub fn is_workflow_event(&self) -> bool {
        matches!(
            self,
            Self::WorkflowStarted { .. }
                | Self::WorkflowCompleted { .. }
                | Self::WorkflowFailed { .. }
        )
    }

    /// snake_case tag, as serialized
    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "workflow_started",
            Self::WorkflowCompleted { .. } => "workflow_completed",
            Self::WorkflowFailed { .. } => "workflow_failed",
            Self::StepStarted { .. } => "step_started",
            Self::TemplateResolved { .. } => "template_resolved",
            Self::ProviderCalled { .. } => "provider_called",
            Self::ProviderResponded { .. } => "provider_responded",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepFailed { .. } => "step_failed",
        }
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append an event, returning its id
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Zero-copy access; holds the read lock for the callback
    pub fn with_events<T>(&self, f: impl FnOnce(&[Event]) -> T) -> T {
        f(&self.events.read())
    }

    pub fn filter_step(&self, step_id: &str) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.step_id() == Some(step_id))
                .cloned()
                .collect()
        })
    }

    pub fn workflow_events(&self) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.is_workflow_event())
                .cloned()
                .collect()
        })
    }

    pub fn to_json(&self) -> Value {
        self.with_events(|events| serde_json::to_value(events).unwrap_or(Value::Null))
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}

impl ObservabilitySink for EventLog {
    fn name(&self) -> &str {
        "log"
    }

    fn record(&self, kind: &EventKind) -> anyhow::Result<()> {
        self.emit(kind.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn started(step: &str) -> EventKind {
        EventKind::StepStarted {
            step_id: Arc::from(step),
        }
    }

    #[test]
    fn test_ids_are_monotonic() {
        let log = EventLog::new();
        assert_eq!(log.emit(started("a")), 0);
        assert_eq!(log.emit(started("b")), 1);
        assert_eq!(log.len(), 2);

        let events = log.events();
        assert!(events[0].timestamp_ms <= events[1].timestamp_ms);
    }

    #[test]
    fn test_filter_step_and_workflow_events() {
        let log = EventLog::new();
        log.emit(EventKind::WorkflowStarted {
            run_id: "r1".into(),
            workflow: "demo".into(),
            step_count: 2,
        });
        log.emit(started("a"));
        log.emit(started("b"));
        log.emit(EventKind::StepCompleted {
            step_id: "a".into(),
            output: json!({"x": 1}),
            duration_ms: 3,
        });

        assert_eq!(log.filter_step("a").len(), 2);
        assert_eq!(log.workflow_events().len(), 1);
    }

    #[test]
    fn test_serializes_with_type_tag() {
        let kind = EventKind::ProviderCalled {
            step_id: "echo".into(),
            provider: "mock".into(),
            model: "m".into(),
            prompt_len: 10,
            tools: vec![],
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], kind.name());
        assert_eq!(json["step_id"], "echo");
    }

    #[test]
    fn test_step_events_round_trip_through_json() {
        let kind = EventKind::StepCompleted {
            step_id: Arc::from("summarize"),
            output: json!({"summary": "short"}),
            duration_ms: 12,
        };
        let json = serde_json::to_value(&kind).unwrap();
        let back: EventKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, kind);

        let back: EventKind = serde_json::from_value(json!({
            "type": "step_started",
            "step_id": "summarize"
        }))
        .unwrap();
        assert_eq!(back, started("summarize"));
    }

    #[test]
    fn test_clones_share_storage() {
        let log = EventLog::new();
        let clone = log.clone();
        clone.emit(started("a"));
        assert_eq!(log.len(), 1);
        assert_eq!(log.to_json()[0]["kind"]["type"], "step_started");
    }

    #[test]
    fn test_concurrent_emit() {
        let log = EventLog::new();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        log.emit(started(&format!("s{}", i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 100);
    }
}
