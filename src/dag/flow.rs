//! FlowGraph - graph built from the workflow's edges
//!
//! Nodes are `START`, every declared step and `END`. Edge endpoints that
//! name none of these are kept as nodes too, so a graph can always be built;
//! reference checking is the validator's job.
//!
//! - Cycle detection: DFS three-color marking
//! - Reachability: BFS forward from START, backward from END

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::EdgeConfig;
use crate::util::{END, START};

pub struct FlowGraph {
    /// node -> successors (edge order)
    adjacency: FxHashMap<Arc<str>, Vec<Arc<str>>>,
    /// node -> predecessors (edge order)
    predecessors: FxHashMap<Arc<str>, Vec<Arc<str>>>,
    /// START, steps in declaration order, END, then stray endpoints
    nodes: Vec<Arc<str>>,
}

impl FlowGraph {
    pub fn new<'a>(step_ids: impl IntoIterator<Item = &'a str>, edges: &[EdgeConfig]) -> Self {
        let mut graph = FlowGraph {
            adjacency: FxHashMap::default(),
            predecessors: FxHashMap::default(),
            nodes: Vec::new(),
        };

        graph.add_node(START);
        for id in step_ids {
            graph.add_node(id);
        }
        graph.add_node(END);

        for edge in edges {
            let from = graph.add_node(&edge.from);
            let to = graph.add_node(&edge.to);
            graph
                .adjacency
                .entry(Arc::clone(&from))
                .or_default()
                .push(Arc::clone(&to));
            graph.predecessors.entry(to).or_default().push(from);
        }

        graph
    }

    fn add_node(&mut self, id: &str) -> Arc<str> {
        if let Some(existing) = self.nodes.iter().find(|n| n.as_ref() == id) {
            return Arc::clone(existing);
        }
        let node: Arc<str> = Arc::from(id);
        self.nodes.push(Arc::clone(&node));
        self.adjacency.entry(Arc::clone(&node)).or_default();
        self.predecessors.entry(Arc::clone(&node)).or_default();
        node
    }

    #[inline]
    pub fn successors(&self, id: &str) -> &[Arc<str>] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    #[inline]
    pub fn predecessors(&self, id: &str) -> &[Arc<str>] {
        self.predecessors.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.adjacency.contains_key(id)
    }

    /// Check if there's a path from `from` to `to` (BFS)
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        self.reachable(from, |id| self.successors(id)).contains(to)
    }

    /// Nodes reachable from START
    pub fn reachable_from_start(&self) -> FxHashSet<&str> {
        self.reachable(START, |id| self.successors(id))
    }

    /// Nodes with a path to END
    pub fn reaching_end(&self) -> FxHashSet<&str> {
        self.reachable(END, |id| self.predecessors(id))
    }

    fn reachable<'a, F>(&'a self, origin: &'a str, next: F) -> FxHashSet<&'a str>
    where
        F: Fn(&str) -> &'a [Arc<str>],
    {
        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut queue: VecDeque<&str> = VecDeque::new();
        visited.insert(origin);
        queue.push_back(origin);

        while let Some(current) = queue.pop_front() {
            for neighbor in next(current) {
                if visited.insert(neighbor.as_ref()) {
                    queue.push_back(neighbor.as_ref());
                }
            }
        }

        visited
    }

    /// Detect cycles using DFS with three-color marking.
    ///
    /// Returns the first cycle found as `A → B → A`.
    pub fn detect_cycles(&self) -> Result<(), String> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn dfs<'a>(
            node: &'a str,
            graph: &'a FlowGraph,
            colors: &mut FxHashMap<&'a str, Color>,
            stack: &mut Vec<&'a str>,
        ) -> Result<(), String> {
            colors.insert(node, Color::Gray);
            stack.push(node);

            for neighbor in graph.successors(node) {
                match colors.get(neighbor.as_ref()) {
                    Some(Color::Gray) => {
                        let start = stack
                            .iter()
                            .position(|x| *x == neighbor.as_ref())
                            .unwrap_or(0);
                        let cycle = stack[start..].join(" → ");
                        return Err(format!("{} → {}", cycle, neighbor));
                    }
                    Some(Color::White) | None => dfs(neighbor.as_ref(), graph, colors, stack)?,
                    Some(Color::Black) => {}
                }
            }

            stack.pop();
            colors.insert(node, Color::Black);
            Ok(())
        }

        let mut colors: FxHashMap<&str, Color> = self
            .nodes
            .iter()
            .map(|id| (id.as_ref(), Color::White))
            .collect();
        let mut stack: Vec<&str> = Vec::new();

        for node in &self.nodes {
            if colors.get(node.as_ref()) == Some(&Color::White) {
                dfs(node.as_ref(), self, &mut colors, &mut stack)?;
            }
        }

        Ok(())
    }

    /// Steps between START and END when the graph is a single chain
    pub fn linear_order(&self) -> Option<Vec<Arc<str>>> {
        let mut order = Vec::new();
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        let mut current: &str = START;

        loop {
            let [next] = self.successors(current) else {
                return None;
            };
            if next.as_ref() == END {
                return Some(order);
            }
            if !seen.insert(next.as_ref()) {
                return None;
            }
            order.push(Arc::clone(next));
            current = next.as_ref();
        }
    }
}
