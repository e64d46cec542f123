//! Dependency-graph cycle detection.
//!
//! A DFS-with-recursion-stack check run over a task id graph supplied as an
//! adjacency lookup rather than an in-memory struct, since the task store's
//! dependency edges live in SQL and are reloaded per check.

use std::collections::{HashMap, HashSet};

/// Returns `true` if adding an edge from `new_id` to each of `new_deps` would
/// introduce a cycle, given the dependency edges already recorded for every
/// other task in `existing`. `existing` maps a task id to its dependency ids.
pub fn would_cycle(new_id: &str, new_deps: &[String], existing: &HashMap<String, Vec<String>>) -> bool {
    let mut graph = existing.clone();
    graph.insert(new_id.to_string(), new_deps.to_vec());

    let mut visited: HashSet<String> = HashSet::new();
    let mut rec_stack: HashSet<String> = HashSet::new();

    fn visit(
        node: &str,
        graph: &HashMap<String, Vec<String>>,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
    ) -> bool {
        if rec_stack.contains(node) {
            return true;
        }
        if visited.contains(node) {
            return false;
        }
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());

        if let Some(deps) = graph.get(node) {
            for dep in deps {
                if visit(dep, graph, visited, rec_stack) {
                    return true;
                }
            }
        }

        rec_stack.remove(node);
        false
    }

    visit(new_id, &graph, &mut visited, &mut rec_stack)
}
