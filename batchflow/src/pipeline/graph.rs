//! Step graph with incremental cycle rejection.
//!
//! The graph is acyclic at all times: an edge is validated against the
//! current graph before it is inserted, so a rejected edge leaves no trace.

use crate::errors::{
    BatchflowError, CycleError, DuplicateEdgeError, DuplicateStepError, InvalidStepName,
    UnknownStepError,
};
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::OnceLock;

fn step_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static pattern is valid"))
}

/// Returns true if `name` is usable as a step name.
#[must_use]
pub fn is_valid_step_name(name: &str) -> bool {
    step_name_pattern().is_match(name)
}

/// A directed acyclic graph of step names.
///
/// Adjacency lists keep edge registration order, which defines merge
/// precedence for steps with several predecessors.
#[derive(Debug, Clone, Default)]
pub struct StepGraph {
    /// Step names in insertion order.
    order: Vec<String>,
    /// Outgoing edges per step.
    successors: HashMap<String, Vec<String>>,
    /// Incoming edges per step.
    predecessors: HashMap<String, Vec<String>>,
    /// All edges in registration order.
    edges: Vec<(String, String)>,
}

impl StepGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a step.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStepName` for a malformed name and `DuplicateStepError`
    /// if the name is taken.
    pub fn add_step(&mut self, name: &str) -> Result<(), BatchflowError> {
        if !is_valid_step_name(name) {
            return Err(InvalidStepName::new(name).into());
        }
        if self.contains(name) {
            return Err(DuplicateStepError::new(name).into());
        }

        self.order.push(name.to_string());
        self.successors.insert(name.to_string(), Vec::new());
        self.predecessors.insert(name.to_string(), Vec::new());
        Ok(())
    }

    /// Checks whether `from -> to` could be added, without adding it.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStepError`, `CycleError` or `DuplicateEdgeError`.
    pub fn check_edge(&self, from: &str, to: &str) -> Result<(), BatchflowError> {
        for name in [from, to] {
            if !self.contains(name) {
                return Err(UnknownStepError::new(name).into());
            }
        }

        if from == to {
            return Err(CycleError::new(from, to, vec![from.to_string(), to.to_string()]).into());
        }

        // The edge closes a cycle iff `from` is already reachable from `to`.
        if let Some(path) = self.find_path(to, from) {
            let mut cycle = Vec::with_capacity(path.len() + 1);
            cycle.push(from.to_string());
            cycle.extend(path);
            return Err(CycleError::new(from, to, cycle).into());
        }

        if self.successors(from).iter().any(|s| s == to) {
            return Err(DuplicateEdgeError::new(from, to).into());
        }

        Ok(())
    }

    /// Adds the edge `from -> to`.
    ///
    /// # Errors
    ///
    /// Fails like [`StepGraph::check_edge`]; the graph is unchanged on error.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), BatchflowError> {
        self.check_edge(from, to)?;

        if let Some(out) = self.successors.get_mut(from) {
            out.push(to.to_string());
        }
        if let Some(inc) = self.predecessors.get_mut(to) {
            inc.push(from.to_string());
        }
        self.edges.push((from.to_string(), to.to_string()));
        Ok(())
    }

    /// Returns true if the step exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.successors.contains_key(name)
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the graph has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Returns step names in insertion order.
    #[must_use]
    pub fn step_names(&self) -> &[String] {
        &self.order
    }

    /// Returns edges in registration order.
    #[must_use]
    pub fn edges(&self) -> &[(String, String)] {
        &self.edges
    }

    /// Returns the direct successors of a step, in edge registration order.
    #[must_use]
    pub fn successors(&self, name: &str) -> &[String] {
        self.successors.get(name).map_or(&[], Vec::as_slice)
    }

    /// Returns the direct predecessors of a step, in edge registration order.
    #[must_use]
    pub fn predecessors(&self, name: &str) -> &[String] {
        self.predecessors.get(name).map_or(&[], Vec::as_slice)
    }

    /// Returns steps without incoming edges, in insertion order.
    #[must_use]
    pub fn sources(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| self.predecessors(name).is_empty())
            .cloned()
            .collect()
    }

    /// Returns steps without outgoing edges, in insertion order.
    #[must_use]
    pub fn sinks(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| self.successors(name).is_empty())
            .cloned()
            .collect()
    }

    /// Returns every step that can reach `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStepError` if the step does not exist.
    pub fn ancestors(&self, name: &str) -> Result<BTreeSet<String>, UnknownStepError> {
        self.reachable(name, |n| self.predecessors(n))
    }

    /// Returns every step reachable from `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStepError` if the step does not exist.
    pub fn descendants(&self, name: &str) -> Result<BTreeSet<String>, UnknownStepError> {
        self.reachable(name, |n| self.successors(n))
    }

    /// Returns true if a non-empty path leads from `from` to `to`.
    #[must_use]
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        from != to && self.find_path(from, to).is_some()
    }

    fn reachable<'g, F>(&'g self, name: &str, next: F) -> Result<BTreeSet<String>, UnknownStepError>
    where
        F: Fn(&str) -> &'g [String],
    {
        if !self.contains(name) {
            return Err(UnknownStepError::new(name));
        }

        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = next(name).iter().map(String::as_str).collect();
        while let Some(node) = stack.pop() {
            if seen.insert(node.to_string()) {
                stack.extend(next(node).iter().map(String::as_str));
            }
        }
        Ok(seen)
    }

    /// Breadth-first search for a path `from -> ... -> to`, both included.
    fn find_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![from.to_string()]);
        }

        let mut parent: HashMap<&str, &str> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::from([from]);
        let mut queue: VecDeque<&str> = VecDeque::from([from]);

        while let Some(node) = queue.pop_front() {
            for next in self.successors(node) {
                if !visited.insert(next.as_str()) {
                    continue;
                }
                parent.insert(next.as_str(), node);
                if next == to {
                    let mut path = vec![to.to_string()];
                    let mut current = to;
                    while let Some(&prev) = parent.get(current) {
                        path.push(prev.to_string());
                        current = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next.as_str());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn graph(steps: &[&str], edges: &[(&str, &str)]) -> StepGraph {
        let mut g = StepGraph::new();
        for s in steps {
            g.add_step(s).unwrap();
        }
        for (from, to) in edges {
            g.add_edge(from, to).unwrap();
        }
        g
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_add_step_duplicate() {
        let mut g = StepGraph::new();
        g.add_step("a").unwrap();

        let err = g.add_step("a").unwrap_err();
        assert!(matches!(err, BatchflowError::DuplicateStep(ref e) if e.name == "a"));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_add_step_invalid_name() {
        let mut g = StepGraph::new();
        assert!(matches!(g.add_step(""), Err(BatchflowError::InvalidStepName(_))));
        assert!(matches!(g.add_step("a b"), Err(BatchflowError::InvalidStepName(_))));
        assert!(g.add_step("load_data-1").is_ok());
    }

    #[test]
    fn test_add_edge_unknown_step() {
        let mut g = graph(&["a"], &[]);

        let err = g.add_edge("a", "ghost").unwrap_err();
        assert!(matches!(err, BatchflowError::UnknownStep(ref e) if e.name == "ghost"));
        let err = g.add_edge("ghost", "a").unwrap_err();
        assert!(matches!(err, BatchflowError::UnknownStep(ref e) if e.name == "ghost"));
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut g = graph(&["a"], &[]);
        assert!(matches!(g.add_edge("a", "a"), Err(BatchflowError::Cycle(_))));
    }

    #[test]
    fn test_two_step_cycle_rejected() {
        let mut g = graph(&["x", "y"], &[("x", "y")]);

        let err = g.add_edge("y", "x").unwrap_err();
        match err {
            BatchflowError::Cycle(e) => {
                assert_eq!(e.from, "y");
                assert_eq!(e.to, "x");
                assert_eq!(e.cycle_path, vec!["y", "x", "y"]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_rejection_leaves_graph_unchanged() {
        let mut g = graph(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("c", "d")]);
        let ancestors_before = g.ancestors("a").unwrap();
        let descendants_before = g.descendants("d").unwrap();

        let err = g.add_edge("d", "a").unwrap_err();
        match err {
            BatchflowError::Cycle(e) => assert_eq!(e.cycle_path, vec!["d", "a", "b", "c", "d"]),
            other => panic!("expected cycle error, got {other:?}"),
        }

        assert_eq!(g.ancestors("a").unwrap(), ancestors_before);
        assert_eq!(g.descendants("d").unwrap(), descendants_before);
        assert_eq!(g.edge_count(), 3);
        assert!(g.successors("d").is_empty());
    }

    #[test]
    fn test_acyclic_edges_in_any_order() {
        let edges = [("a", "b"), ("a", "c"), ("b", "d"), ("c", "d"), ("a", "d")];
        let mut reversed = edges;
        reversed.reverse();

        for order in [edges, reversed] {
            let g = graph(&["a", "b", "c", "d"], &order);
            assert_eq!(g.edge_count(), 5);
            assert_eq!(g.ancestors("d").unwrap(), set(&["a", "b", "c"]));
        }
    }

    #[test]
    fn test_duplicate_edge_rejected() {
        let mut g = graph(&["a", "b"], &[("a", "b")]);
        assert!(matches!(g.add_edge("a", "b"), Err(BatchflowError::DuplicateEdge(_))));
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let g = graph(
            &["a", "b", "c", "d", "e"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );

        assert_eq!(g.ancestors("d").unwrap(), set(&["a", "b", "c"]));
        assert_eq!(g.descendants("a").unwrap(), set(&["b", "c", "d"]));
        assert!(g.ancestors("e").unwrap().is_empty());
        assert!(g.ancestors("ghost").is_err());
        assert!(g.has_path("a", "d"));
        assert!(!g.has_path("b", "c"));
        assert!(!g.has_path("a", "a"));
    }

    #[test]
    fn test_sources_sinks_and_order() {
        let g = graph(&["b", "a", "c"], &[("b", "c"), ("a", "c")]);

        assert_eq!(g.sources(), vec!["b", "a"]);
        assert_eq!(g.sinks(), vec!["c"]);
        assert_eq!(g.predecessors("c"), ["b".to_string(), "a".to_string()]);
        assert_eq!(g.step_names(), ["b".to_string(), "a".to_string(), "c".to_string()]);
    }
}
