//! Observability sinks
//!
//! A sink sees every event of a run. Sinks never influence control flow:
//! the [`Observer`] swallows their errors and panics after logging them.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use super::log::{EventKind, EventLog};
use crate::ast::{ObservabilitySettings, SinkKind};

pub trait ObservabilitySink: Send + Sync {
    fn name(&self) -> &str;

    fn record(&self, kind: &EventKind) -> anyhow::Result<()>;
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ObservabilitySink for NoopSink {
    fn name(&self) -> &str {
        "none"
    }

    fn record(&self, _kind: &EventKind) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Forwards events to `tracing` at INFO under the `flowline::events` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn record(&self, kind: &EventKind) -> anyhow::Result<()> {
        let payload = serde_json::to_string(kind)?;
        info!(
            target: "flowline::events",
            event = kind.name(),
            step = kind.step_id().unwrap_or("-"),
            %payload
        );
        Ok(())
    }
}

/// Fan-out to the attached sinks with failure isolation
#[derive(Default)]
pub struct Observer {
    sinks: Vec<Arc<dyn ObservabilitySink>>,
    failures: AtomicUsize,
}

impl Observer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sinks for `config.observability`; `log` records into `log`
    pub fn from_settings(settings: &ObservabilitySettings, log: &EventLog) -> Self {
        let mut observer = Self::new();
        if settings.enabled {
            match settings.sink {
                SinkKind::None => {}
                SinkKind::Log => observer.attach(Arc::new(log.clone())),
                SinkKind::Tracing => observer.attach(Arc::new(TracingSink)),
            }
        }
        observer
    }

    pub fn attach(&mut self, sink: Arc<dyn ObservabilitySink>) {
        self.sinks.push(sink);
    }

    pub fn emit(&self, kind: EventKind) {
        for sink in &self.sinks {
            let outcome = catch_unwind(AssertUnwindSafe(|| sink.record(&kind)));
            let problem = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{:#}", e),
                Err(panic) => panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string()),
            };
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!(sink = sink.name(), event = kind.name(), error = %problem, "observability sink failed; ignoring");
        }
    }

    /// Sink errors and panics swallowed so far
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("sinks", &self.sink_names())
            .field("failures", &self.failures())
            .finish()
    }
}
