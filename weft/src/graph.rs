//! Dependency graph over canonical action ids.
//!
//! Maps each action to its ordered dependencies and yields a post-order
//! execution stack: every dependency appears strictly before its
//! dependent. Cycles are rejected with an error naming the node where the
//! walk re-entered its own recursion stack.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

/// Error from the dependency walk.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// The dependency relation contains a cycle through the named action.
    #[error("cyclic dependency detected at {0}")]
    CyclicDependency(String),
}

/// Dependency graph: canonical action id to its ordered dependency list.
///
/// Values that are not keys are tolerated: the walk logs a warning and
/// skips them, so one missing optional dependency does not halt a run.
///
/// **Interaction**: built by resource discovery; walked once per request
/// with a shared `visited` set so overlapping stacks do not re-emit nodes.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an action and its ordered dependencies, replacing any
    /// previous entry for the same id.
    pub fn insert(&mut self, action_id: impl Into<String>, requires: Vec<String>) {
        self.edges.insert(action_id.into(), requires);
    }

    /// True when the action is a known node.
    pub fn contains(&self, action_id: &str) -> bool {
        self.edges.contains_key(action_id)
    }

    /// Dependencies declared for an action, empty when unknown.
    pub fn requires(&self, action_id: &str) -> &[String] {
        self.edges.get(action_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Builds the execution stack for `target`: a post-order over the
    /// dependency relation, dependencies before dependents, duplicates
    /// collapsed via the shared `visited` set.
    ///
    /// Iterative DFS. A node found on the current recursion path is a
    /// cycle and aborts the walk. References to unknown actions are
    /// skipped with a warning.
    pub fn build_dependency_stack(
        &self,
        target: &str,
        visited: &mut HashSet<String>,
    ) -> Result<Vec<String>, GraphError> {
        let mut stack = Vec::new();
        if visited.contains(target) {
            return Ok(stack);
        }
        if !self.edges.contains_key(target) {
            tracing::warn!(action_id = target, "target not present in resources; skipping");
            return Ok(stack);
        }

        // (node, child cursor); a node is on the recursion path while its
        // frame is live.
        let mut frames: Vec<(&str, usize)> = vec![(target, 0)];
        let mut on_path: HashSet<&str> = HashSet::from([target]);

        while let Some((node, cursor)) = frames.last_mut() {
            let deps = self.edges.get(*node).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(dep) = deps.get(*cursor) {
                *cursor += 1;
                if visited.contains(dep.as_str()) {
                    continue;
                }
                if on_path.contains(dep.as_str()) {
                    return Err(GraphError::CyclicDependency(dep.clone()));
                }
                if !self.edges.contains_key(dep) {
                    tracing::warn!(
                        action_id = dep.as_str(),
                        required_by = *node,
                        "dependency not present in resources; skipping"
                    );
                    continue;
                }
                frames.push((dep.as_str(), 0));
                on_path.insert(dep.as_str());
            } else {
                let finished = *node;
                frames.pop();
                on_path.remove(finished);
                visited.insert(finished.to_string());
                stack.push(finished.to_string());
            }
        }

        Ok(stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for (node, deps) in edges {
            g.insert(*node, deps.iter().map(|s| s.to_string()).collect());
        }
        g
    }

    /// **Scenario**: linear chain C → B → A yields A, B, C.
    #[test]
    fn stack_orders_linear_chain() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let mut visited = HashSet::new();
        let stack = g.build_dependency_stack("c", &mut visited).unwrap();
        assert_eq!(stack, ["a", "b", "c"]);
    }

    /// **Scenario**: diamond keeps every dependency strictly before its
    /// dependent and collapses the shared node.
    #[test]
    fn stack_orders_diamond_without_duplicates() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);
        let mut visited = HashSet::new();
        let stack = g.build_dependency_stack("d", &mut visited).unwrap();
        assert_eq!(stack.len(), 4);
        let pos = |x: &str| stack.iter().position(|s| s == x).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn cycle_is_rejected_with_the_node_name() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        let mut visited = HashSet::new();
        let err = g.build_dependency_stack("a", &mut visited).unwrap_err();
        assert_eq!(err, GraphError::CyclicDependency("a".to_string()));
    }

    #[test]
    fn self_cycle_is_rejected() {
        let g = graph(&[("a", &["a"])]);
        let mut visited = HashSet::new();
        assert!(matches!(
            g.build_dependency_stack("a", &mut visited),
            Err(GraphError::CyclicDependency(_))
        ));
    }

    #[test]
    fn unknown_dependency_is_skipped() {
        let g = graph(&[("a", &["ghost"]), ("b", &["a"])]);
        let mut visited = HashSet::new();
        let stack = g.build_dependency_stack("b", &mut visited).unwrap();
        assert_eq!(stack, ["a", "b"]);
    }

    #[test]
    fn shared_visited_set_suppresses_re_emission() {
        let g = graph(&[("a", &[]), ("b", &["a"])]);
        let mut visited = HashSet::new();
        let first = g.build_dependency_stack("b", &mut visited).unwrap();
        assert_eq!(first, ["a", "b"]);
        let second = g.build_dependency_stack("a", &mut visited).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn unknown_target_yields_empty_stack() {
        let g = graph(&[("a", &[])]);
        let mut visited = HashSet::new();
        assert!(g.build_dependency_stack("zzz", &mut visited).unwrap().is_empty());
    }
}
