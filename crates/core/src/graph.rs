//! Dependency graph over the steps of a task.
//!
//! The graph is derived data: it is rebuilt from the step list whenever the
//! step set changes and is never persisted on its own. Unknown dependency ids
//! are dropped and cycles leave the topological order empty; both are
//! reported through [`DependencyGraph::warnings`] rather than as errors, and
//! the scheduler keeps working from per-step dependency checks.

use std::collections::{HashMap, HashSet, VecDeque};
use crate::id::StepId;
use crate::step::Step;

/// Problems found while building a graph. None of them stop execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphWarning {
    /// A step declared a dependency on an id that is not in the task.
    UnknownDependency {
        /// Declaring step
        step: StepId,
        /// Missing dependency id
        dependency: StepId,
    },
    /// The steps listed take part in, or sit behind, a dependency cycle.
    Cycle {
        /// Steps that could not be ordered
        steps: Vec<StepId>,
    },
}

impl std::fmt::Display for GraphWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownDependency { step, dependency } => {
                write!(f, "step {} depends on unknown step {}", step, dependency)
            }
            Self::Cycle { steps } => {
                let ids: Vec<&str> = steps.iter().map(|s| s.as_str()).collect();
                write!(f, "cyclic dependency among steps [{}]", ids.join(", "))
            }
        }
    }
}

/// Directed graph with an edge `dependency -> dependent` per declared
/// dependency.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyGraph {
    /// Step ids in task order
    pub nodes: Vec<StepId>,

    /// `(from, to)` edges, `from` must finish before `to`
    pub edges: Vec<(StepId, StepId)>,

    /// Kahn order; empty when the graph is cyclic
    pub topological_order: Vec<StepId>,

    /// Non-fatal problems found while building
    pub warnings: Vec<GraphWarning>,

    /// step -> steps that depend on it
    dependents: HashMap<StepId, Vec<StepId>>,

    /// step -> steps it depends on
    dependencies: HashMap<StepId, Vec<StepId>>,
}

impl DependencyGraph {
    /// Build the graph for a step list.
    pub fn build(steps: &[Step]) -> Self {
        let nodes: Vec<StepId> = steps.iter().map(|s| s.id.clone()).collect();
        let known: HashSet<&StepId> = nodes.iter().collect();

        let mut graph = Self {
            nodes: nodes.clone(),
            ..Default::default()
        };

        for step in steps {
            let mut seen = HashSet::new();
            for dep in &step.dependencies {
                if !known.contains(dep) {
                    graph.warnings.push(GraphWarning::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                    continue;
                }
                if !seen.insert(dep) {
                    continue;
                }
                graph.edges.push((dep.clone(), step.id.clone()));
                graph.dependents.entry(dep.clone()).or_default().push(step.id.clone());
                graph.dependencies.entry(step.id.clone()).or_default().push(dep.clone());
            }
        }

        graph.topological_order = graph.kahn_order();
        if graph.topological_order.is_empty() && !graph.nodes.is_empty() {
            let ordered: HashSet<StepId> = graph.partial_order().into_iter().collect();
            let stuck = graph
                .nodes
                .iter()
                .filter(|id| !ordered.contains(*id))
                .cloned()
                .collect();
            graph.warnings.push(GraphWarning::Cycle { steps: stuck });
        }

        graph
    }

    /// Whether a complete topological order exists.
    pub fn is_acyclic(&self) -> bool {
        self.nodes.is_empty() || !self.topological_order.is_empty()
    }

    /// Steps that wait on `id`.
    pub fn dependents_of(&self, id: &StepId) -> &[StepId] {
        self.dependents.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Known steps `id` waits on.
    pub fn dependencies_of(&self, id: &StepId) -> &[StepId] {
        self.dependencies.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Length of the heaviest dependency chain, given a weight per step.
    ///
    /// Returns `None` when the graph is cyclic.
    pub fn critical_path<F>(&self, weight: F) -> Option<u64>
    where
        F: Fn(&StepId) -> u64,
    {
        if !self.is_acyclic() {
            return None;
        }

        let mut finish: HashMap<&StepId, u64> = HashMap::new();
        for id in &self.topological_order {
            let start = self
                .dependencies_of(id)
                .iter()
                .filter_map(|dep| finish.get(dep))
                .copied()
                .max()
                .unwrap_or(0);
            finish.insert(id, start.saturating_add(weight(id)));
        }

        Some(finish.values().copied().max().unwrap_or(0))
    }

    /// Kahn's algorithm; returns an empty vector if not every node can be
    /// ordered.
    fn kahn_order(&self) -> Vec<StepId> {
        let order = self.partial_order();
        if order.len() == self.nodes.len() {
            order
        } else {
            Vec::new()
        }
    }

    /// Nodes Kahn's algorithm can order before it gets stuck. Ties follow
    /// task order so the result is deterministic.
    fn partial_order(&self) -> Vec<StepId> {
        let mut in_degree: HashMap<&StepId, usize> = self
            .nodes
            .iter()
            .map(|id| (id, self.dependencies_of(id).len()))
            .collect();

        let mut ready: VecDeque<&StepId> = self
            .nodes
            .iter()
            .filter(|id| in_degree.get(id).copied() == Some(0))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_front() {
            order.push(id.clone());
            for dependent in self.dependents_of(id) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }

        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<StepId> {
        raw.iter().map(|s| StepId::from(*s)).collect()
    }

    #[test]
    fn test_linear_chain_order() {
        let steps = vec![
            Step::new("c", "C").depends_on("b"),
            Step::new("a", "A"),
            Step::new("b", "B").depends_on("a"),
        ];
        let graph = DependencyGraph::build(&steps);

        assert_eq!(graph.topological_order, ids(&["a", "b", "c"]));
        assert!(graph.is_acyclic());
        assert!(graph.warnings.is_empty());
        assert_eq!(graph.edges.len(), 2);
    }

    #[test]
    fn test_diamond_respects_task_order_for_ties() {
        let steps = vec![
            Step::new("s1", "root"),
            Step::new("s2", "left").depends_on("s1"),
            Step::new("s3", "right").depends_on("s1"),
            Step::new("s4", "join").depends_on("s2").depends_on("s3"),
        ];
        let graph = DependencyGraph::build(&steps);

        assert_eq!(graph.topological_order, ids(&["s1", "s2", "s3", "s4"]));
        assert_eq!(graph.dependents_of(&"s1".into()), ids(&["s2", "s3"]).as_slice());
        assert_eq!(graph.dependencies_of(&"s4".into()), ids(&["s2", "s3"]).as_slice());
    }

    #[test]
    fn test_unknown_dependency_is_dropped_with_warning() {
        let steps = vec![Step::new("a", "A").depends_on("ghost")];
        let graph = DependencyGraph::build(&steps);

        assert!(graph.edges.is_empty());
        assert_eq!(graph.topological_order, ids(&["a"]));
        assert_eq!(
            graph.warnings,
            vec![GraphWarning::UnknownDependency {
                step: "a".into(),
                dependency: "ghost".into(),
            }]
        );
    }

    #[test]
    fn test_cycle_leaves_order_empty() {
        let steps = vec![
            Step::new("a", "A").depends_on("b"),
            Step::new("b", "B").depends_on("a"),
            Step::new("c", "C"),
        ];
        let graph = DependencyGraph::build(&steps);

        assert!(graph.topological_order.is_empty());
        assert!(!graph.is_acyclic());
        assert_eq!(graph.warnings, vec![GraphWarning::Cycle { steps: ids(&["a", "b"]) }]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let steps = vec![Step::new("a", "A").depends_on("a")];
        let graph = DependencyGraph::build(&steps);
        assert!(!graph.is_acyclic());
    }

    #[test]
    fn test_duplicate_dependency_yields_single_edge() {
        let steps = vec![
            Step::new("a", "A"),
            Step::new("b", "B").depends_on("a").depends_on("a"),
        ];
        let graph = DependencyGraph::build(&steps);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.topological_order, ids(&["a", "b"]));
    }

    #[test]
    fn test_empty_graph_is_acyclic() {
        let graph = DependencyGraph::build(&[]);
        assert!(graph.is_acyclic());
        assert!(graph.warnings.is_empty());
    }

    #[test]
    fn test_critical_path() {
        let steps = vec![
            Step::new("s1", "root"),
            Step::new("s2", "slow").depends_on("s1"),
            Step::new("s3", "fast").depends_on("s1"),
        ];
        let graph = DependencyGraph::build(&steps);
        let weight = |id: &StepId| match id.as_str() {
            "s1" => 10,
            "s2" => 50,
            _ => 5,
        };
        assert_eq!(graph.critical_path(weight), Some(60));

        let cyclic = DependencyGraph::build(&[
            Step::new("a", "A").depends_on("b"),
            Step::new("b", "B").depends_on("a"),
        ]);
        assert_eq!(cyclic.critical_path(|_| 1), None);
    }

    #[test]
    fn test_critical_path_saturates() {
        let graph = DependencyGraph::build(&[
            Step::new("s1", "root"),
            Step::new("s2", "leaf").depends_on("s1"),
        ]);
        assert_eq!(graph.critical_path(|_| u64::MAX - 1), Some(u64::MAX));
    }
}
