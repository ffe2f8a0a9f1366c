//! DAG Module - edge graph over START, steps and END
//!
//! - `flow`: `FlowGraph` (adjacency, cycle detection, reachability, linear order)

mod flow;

pub use flow::FlowGraph;
