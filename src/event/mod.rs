//! Event Module - observability for pipeline runs
//!
//! - `Event`: envelope with id + timestamp + kind
//! - `EventKind`: workflow and step level variants
//! - `EventLog`: thread-safe, append-only log (also a sink)
//! - `ObservabilitySink`: trait for sinks; `NoopSink`, `TracingSink`
//! - `Observer`: fan-out that isolates sink failures from the run

mod log;
mod sink;

pub use log::{Event, EventKind, EventLog};
pub use sink::{NoopSink, ObservabilitySink, Observer, TracingSink};
