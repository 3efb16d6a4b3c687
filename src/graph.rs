//! Dependency Graph — DAG of executions with online cycle prevention.
//!
//! Forward edges are dependencies, reverse edges are dependents, and the
//! whole structure lives under one mutex so the cycle check and the edge
//! commit are a single atomic step. Every operation is total: `add_node`
//! returning false is the only error channel.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::Serialize;

/// One execution's place in the graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub execution_id: String,
    pub dependencies: HashSet<String>,
    pub dependents: HashSet<String>,
    pub completed: bool,
}

impl GraphNode {
    fn new(execution_id: &str) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            dependencies: HashSet::new(),
            dependents: HashSet::new(),
            completed: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub total: usize,
    pub completed: usize,
    pub ready: usize,
    pub blocked: usize,
}

#[derive(Default)]
struct GraphInner {
    nodes: HashMap<String, GraphNode>,
    /// Completion records. Deliberately a superset of node completions:
    /// `mark_completed` accepts ids the graph never learned about, which
    /// lets external callers pre-satisfy dependencies. Review note — this
    /// also means a typoed dependency id can be unblocked from outside.
    completed: HashSet<String>,
}

#[derive(Default)]
pub struct DependencyGraph {
    inner: Mutex<GraphInner>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `execution_id` depending on `dependencies`. Returns false and
    /// commits nothing if any dependency can already reach `execution_id`
    /// (the insert would close a cycle). Dependency targets unknown to the
    /// graph are materialized as placeholder nodes so their dependents
    /// stay blocked until someone completes them.
    pub fn add_node(&self, execution_id: &str, dependencies: &[String]) -> bool {
        let mut inner = lock_recover(&self.inner);

        for dep in dependencies {
            if dep == execution_id || reaches(&inner.nodes, dep, execution_id) {
                tracing::warn!(
                    execution_id,
                    dependency = %dep,
                    "Rejected graph insert: would create a cycle"
                );
                return false;
            }
        }

        inner
            .nodes
            .entry(execution_id.to_string())
            .or_insert_with(|| GraphNode::new(execution_id))
            .dependencies
            .extend(dependencies.iter().cloned());

        for dep in dependencies {
            inner
                .nodes
                .entry(dep.clone())
                .or_insert_with(|| GraphNode::new(dep))
                .dependents
                .insert(execution_id.to_string());
        }

        true
    }

    /// Remove a node and the edges stored on it. Dependents keep their
    /// forward edge to the now-missing id; `are_deps_satisfied` treats
    /// missing ids as satisfied, so removal doubles as a forced unblock.
    pub fn remove_node(&self, execution_id: &str) {
        let mut inner = lock_recover(&self.inner);
        if let Some(node) = inner.nodes.remove(execution_id) {
            for dep in &node.dependencies {
                if let Some(dep_node) = inner.nodes.get_mut(dep) {
                    dep_node.dependents.remove(execution_id);
                }
            }
        }
    }

    /// Record completion. Unknown ids are accepted and recorded; see the
    /// note on `GraphInner::completed`.
    pub fn mark_completed(&self, execution_id: &str) {
        let mut inner = lock_recover(&self.inner);
        inner.completed.insert(execution_id.to_string());
        if let Some(node) = inner.nodes.get_mut(execution_id) {
            node.completed = true;
        }
    }

    /// True iff every dependency of `execution_id` is completed. Ids that
    /// are neither completed nor present in the graph count as satisfied
    /// (they were removed or belong to an ancestor the graph never saw).
    pub fn are_deps_satisfied(&self, execution_id: &str) -> bool {
        let inner = lock_recover(&self.inner);
        deps_satisfied(&inner, execution_id)
    }

    pub fn get_dependencies(&self, execution_id: &str) -> Vec<String> {
        let inner = lock_recover(&self.inner);
        inner
            .nodes
            .get(execution_id)
            .map(|n| n.dependencies.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_dependents(&self, execution_id: &str) -> Vec<String> {
        let inner = lock_recover(&self.inner);
        inner
            .nodes
            .get(execution_id)
            .map(|n| n.dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_all(&self) -> Vec<GraphNode> {
        let inner = lock_recover(&self.inner);
        inner.nodes.values().cloned().collect()
    }

    pub fn get_completed(&self) -> Vec<String> {
        let inner = lock_recover(&self.inner);
        inner.completed.iter().cloned().collect()
    }

    /// Nodes that are not completed and whose dependencies are satisfied.
    pub fn get_ready(&self) -> Vec<String> {
        let inner = lock_recover(&self.inner);
        inner
            .nodes
            .values()
            .filter(|n| !n.completed && deps_satisfied(&inner, &n.execution_id))
            .map(|n| n.execution_id.clone())
            .collect()
    }

    pub fn statistics(&self) -> GraphStats {
        let inner = lock_recover(&self.inner);
        let total = inner.nodes.len();
        let completed = inner.nodes.values().filter(|n| n.completed).count();
        let ready = inner
            .nodes
            .values()
            .filter(|n| !n.completed && deps_satisfied(&inner, &n.execution_id))
            .count();
        GraphStats {
            total,
            completed,
            ready,
            blocked: total - completed - ready,
        }
    }

    /// Diagnostic full-graph sweep. Returns one cycle path if any exists.
    /// `add_node` rejects cycles up front, so a non-None result means the
    /// graph was corrupted from outside this API.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let inner = lock_recover(&self.inner);
        let mut state: HashMap<String, Color> = HashMap::new();
        let mut path: Vec<String> = Vec::new();

        for id in inner.nodes.keys() {
            if state.get(id).copied().unwrap_or(Color::White) == Color::White {
                if let Some(cycle) = visit(&inner.nodes, id, &mut state, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

fn visit(
    nodes: &HashMap<String, GraphNode>,
    id: &str,
    state: &mut HashMap<String, Color>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    state.insert(id.to_string(), Color::Gray);
    path.push(id.to_string());

    if let Some(node) = nodes.get(id) {
        for dep in &node.dependencies {
            if !nodes.contains_key(dep) {
                continue;
            }
            match state.get(dep).copied().unwrap_or(Color::White) {
                Color::Gray => {
                    let start = path.iter().position(|p| p == dep).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                Color::White => {
                    if let Some(cycle) = visit(nodes, dep, state, path) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }
    }

    state.insert(id.to_string(), Color::Black);
    path.pop();
    None
}

/// Depth-first reachability along dependency edges: can `from` reach `to`?
fn reaches(nodes: &HashMap<String, GraphNode>, from: &str, to: &str) -> bool {
    let mut stack = vec![from.to_string()];
    let mut seen: HashSet<String> = HashSet::new();

    while let Some(current) = stack.pop() {
        if current == to {
            return true;
        }
        if !seen.insert(current.clone()) {
            continue;
        }
        if let Some(node) = nodes.get(&current) {
            stack.extend(node.dependencies.iter().cloned());
        }
    }
    false
}

fn deps_satisfied(inner: &GraphInner, execution_id: &str) -> bool {
    match inner.nodes.get(execution_id) {
        Some(node) => node
            .dependencies
            .iter()
            .all(|dep| inner.completed.contains(dep) || !inner.nodes.contains_key(dep)),
        None => true,
    }
}

/// Graph sections never run user code; recover a poisoned lock in place.
fn lock_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_node_records_exact_dependencies() {
        let graph = DependencyGraph::new();
        assert!(graph.add_node("exec-2", &deps(&["exec-1", "exec-0"])));

        let mut got = graph.get_dependencies("exec-2");
        got.sort();
        assert_eq!(got, vec!["exec-0", "exec-1"]);
        assert_eq!(graph.get_dependents("exec-1"), vec!["exec-2"]);
    }

    #[test]
    fn test_placeholder_dependency_blocks_until_completed() {
        let graph = DependencyGraph::new();
        // exec-1 was never added itself, only named as a dependency.
        assert!(graph.add_node("exec-2", &deps(&["exec-1"])));
        assert!(!graph.are_deps_satisfied("exec-2"));

        graph.mark_completed("exec-1");
        assert!(graph.are_deps_satisfied("exec-2"));
    }

    #[test]
    fn test_cycle_rejected_without_mutation() {
        let graph = DependencyGraph::new();
        assert!(graph.add_node("a", &deps(&["b"])));
        assert!(!graph.add_node("b", &deps(&["a"])));

        // The rejected insert left no trace: b is still the bare
        // placeholder created by a's edge.
        assert!(graph.get_dependencies("b").is_empty());
        assert!(graph.detect_cycle().is_none());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let graph = DependencyGraph::new();
        assert!(!graph.add_node("a", &deps(&["a"])));
        assert!(graph.get_all().is_empty());
    }

    #[test]
    fn test_transitive_cycle_rejected() {
        let graph = DependencyGraph::new();
        assert!(graph.add_node("b", &deps(&["a"])));
        assert!(graph.add_node("c", &deps(&["b"])));
        // a -> c would close a <- b <- c.
        assert!(!graph.add_node("a", &deps(&["c"])));
        assert!(graph.detect_cycle().is_none());
    }

    #[test]
    fn test_mark_completed_accepts_unknown_ids() {
        let graph = DependencyGraph::new();
        graph.mark_completed("never-added");
        assert!(graph.get_completed().contains(&"never-added".to_string()));

        assert!(graph.add_node("exec-1", &deps(&["never-added"])));
        assert!(graph.are_deps_satisfied("exec-1"));
    }

    #[test]
    fn test_remove_node_acts_as_forced_unblock() {
        let graph = DependencyGraph::new();
        assert!(graph.add_node("a", &[]));
        assert!(graph.add_node("b", &deps(&["a"])));
        assert!(!graph.are_deps_satisfied("b"));

        graph.remove_node("a");
        // b still carries the dangling edge, but a missing ancestor
        // counts as satisfied.
        assert_eq!(graph.get_dependencies("b"), vec!["a"]);
        assert!(graph.are_deps_satisfied("b"));
    }

    #[test]
    fn test_ready_and_statistics() {
        let graph = DependencyGraph::new();
        assert!(graph.add_node("a", &[]));
        assert!(graph.add_node("b", &deps(&["a"])));
        assert!(graph.add_node("c", &deps(&["b"])));

        let stats = graph.statistics();
        assert_eq!((stats.total, stats.completed, stats.ready, stats.blocked), (3, 0, 1, 2));
        assert_eq!(graph.get_ready(), vec!["a"]);

        graph.mark_completed("a");
        let stats = graph.statistics();
        assert_eq!((stats.completed, stats.ready, stats.blocked), (1, 1, 1));
        assert_eq!(graph.get_ready(), vec!["b"]);
    }

    #[test]
    fn test_diamond_readiness() {
        let graph = DependencyGraph::new();
        assert!(graph.add_node("a", &[]));
        assert!(graph.add_node("b", &deps(&["a"])));
        assert!(graph.add_node("c", &deps(&["a"])));
        assert!(graph.add_node("d", &deps(&["b", "c"])));

        graph.mark_completed("a");
        let mut ready = graph.get_ready();
        ready.sort();
        assert_eq!(ready, vec!["b", "c"]);

        graph.mark_completed("b");
        assert!(!graph.are_deps_satisfied("d"));
        graph.mark_completed("c");
        assert!(graph.are_deps_satisfied("d"));
    }
}
