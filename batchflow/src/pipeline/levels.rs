//! Partitioning of a step graph into parallel execution tiers.
//!
//! A step's level is the length of the longest path reaching it from any
//! source. Every edge therefore goes from a lower to a strictly higher level,
//! and steps sharing a level cannot reach each other.

use super::StepGraph;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Ordered tiers of mutually independent steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Levels {
    /// Step names per level, sorted by name within a level.
    tiers: Vec<Vec<String>>,
    /// Level of every step.
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Levels {
    /// Computes the levels of `graph` in one topological pass.
    #[must_use]
    pub fn compute(graph: &StepGraph) -> Self {
        let mut in_degree: HashMap<&str, usize> = graph
            .step_names()
            .iter()
            .map(|name| (name.as_str(), graph.predecessors(name).len()))
            .collect();
        let mut level: HashMap<&str, usize> = HashMap::with_capacity(graph.len());
        let mut queue: VecDeque<&str> = graph
            .step_names()
            .iter()
            .map(String::as_str)
            .filter(|name| in_degree.get(name) == Some(&0))
            .collect();

        while let Some(node) = queue.pop_front() {
            let node_level = *level.entry(node).or_insert(0);
            for next in graph.successors(node) {
                let next_level = level.entry(next.as_str()).or_insert(0);
                *next_level = (*next_level).max(node_level + 1);

                if let Some(degree) = in_degree.get_mut(next.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(next.as_str());
                    }
                }
            }
        }
        debug_assert_eq!(level.len(), graph.len(), "step graph must be acyclic");

        let depth = level.values().max().map_or(0, |max| max + 1);
        let mut tiers: Vec<Vec<String>> = vec![Vec::new(); depth];
        for (name, lvl) in &level {
            tiers[*lvl].push((*name).to_string());
        }
        for tier in &mut tiers {
            tier.sort();
        }

        let index = level
            .into_iter()
            .map(|(name, lvl)| (name.to_string(), lvl))
            .collect();

        Self { tiers, index }
    }

    /// Returns the tiers in increasing level order.
    #[must_use]
    pub fn tiers(&self) -> &[Vec<String>] {
        &self.tiers
    }

    /// Returns the level of a step.
    #[must_use]
    pub fn level_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Returns the number of levels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Returns true if there are no levels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Iterates over the tiers.
    pub fn iter(&self) -> std::slice::Iter<'_, Vec<String>> {
        self.tiers.iter()
    }
}

impl<'a> IntoIterator for &'a Levels {
    type Item = &'a Vec<String>;
    type IntoIter = std::slice::Iter<'a, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.tiers.iter()
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

    fn assert_level_invariants(g: &StepGraph, levels: &Levels) {
        for (from, to) in g.edges() {
            assert!(
                levels.level_of(from).unwrap() < levels.level_of(to).unwrap(),
                "edge {from} -> {to} does not increase level"
            );
        }
        for tier in levels {
            for a in tier {
                for b in tier {
                    assert!(!g.has_path(a, b), "{a} reaches {b} within one level");
                }
            }
        }
        let total: usize = levels.iter().map(Vec::len).sum();
        assert_eq!(total, g.len());
    }

    #[test]
    fn test_empty_graph() {
        let levels = Levels::compute(&StepGraph::new());
        assert!(levels.is_empty());
        assert_eq!(levels.len(), 0);
    }

    #[test]
    fn test_diamond_levels() {
        let g = graph(&["a", "c", "b", "d"], &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]);
        let levels = Levels::compute(&g);

        assert_eq!(levels.tiers(), [vec!["a"], vec!["b", "c"], vec!["d"]]);
        assert_level_invariants(&g, &levels);
    }

    #[test]
    fn test_uneven_path_depths() {
        // Averaging predecessor depths would put `d` next to `c`.
        let g = graph(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("a", "d"), ("c", "d")],
        );
        let levels = Levels::compute(&g);

        assert_eq!(levels.level_of("d"), Some(3));
        assert_eq!(levels.level_of("c"), Some(2));
        assert_level_invariants(&g, &levels);
    }

    #[test]
    fn test_disconnected_components_and_tie_break() {
        let g = graph(&["z", "m", "y", "a"], &[("z", "y"), ("m", "a")]);
        let levels = Levels::compute(&g);

        assert_eq!(levels.tiers(), [vec!["m", "z"], vec!["a", "y"]]);
        assert_level_invariants(&g, &levels);
    }

    #[test]
    fn test_wide_layered_graph() {
        let names: Vec<String> = (0..30).map(|i| format!("s{i:02}")).collect();
        let mut g = StepGraph::new();
        for name in &names {
            g.add_step(name).unwrap();
        }
        // Each step feeds the next two, so depth grows with skipped links.
        for i in 0..names.len() {
            for j in [i + 1, i + 3] {
                if j < names.len() {
                    g.add_edge(&names[i], &names[j]).unwrap();
                }
            }
        }

        let levels = Levels::compute(&g);
        assert_eq!(levels.len(), names.len());
        assert_level_invariants(&g, &levels);
    }

    #[test]
    fn test_levels_deterministic() {
        let g = graph(
            &["e", "d", "c", "b", "a"],
            &[("a", "c"), ("b", "c"), ("c", "d"), ("b", "e")],
        );

        let first = Levels::compute(&g);
        let second = Levels::compute(&g);
        assert_eq!(first, second);
        assert_eq!(first.tiers(), [vec!["a", "b"], vec!["c", "e"], vec!["d"]]);
    }
}
