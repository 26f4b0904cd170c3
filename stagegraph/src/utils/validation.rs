//! Validation helpers for graph definitions and identifiers.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::OnceLock;

/// Names reserved for the START and END cursors.
pub const RESERVED_NAMES: [&str; 2] = ["__start__", "__end__"];

#[allow(clippy::expect_used)]
fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.:-]*$").expect("identifier pattern compiles")
    })
}

/// Returns true if `name` is usable as a stage name, label or session id.
#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    !RESERVED_NAMES.contains(&name) && identifier_pattern().is_match(name)
}

/// Finds a cycle in a successor map, returning the path that closes it.
///
/// Nodes are visited in key order so the reported cycle is deterministic.
#[must_use]
pub fn find_cycle(successors: &BTreeMap<String, BTreeSet<String>>) -> Option<Vec<String>> {
    fn dfs(
        node: &str,
        successors: &BTreeMap<String, BTreeSet<String>>,
        visited: &mut HashSet<String>,
        in_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if in_stack.contains(node) {
            let start_idx = path.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle_path: Vec<String> = path[start_idx..].to_vec();
            cycle_path.push(node.to_string());
            return Some(cycle_path);
        }

        if visited.contains(node) {
            return None;
        }

        visited.insert(node.to_string());
        in_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(next) = successors.get(node) {
            for succ in next {
                if let Some(cycle) = dfs(succ, successors, visited, in_stack, path) {
                    return Some(cycle);
                }
            }
        }

        in_stack.remove(node);
        path.pop();
        None
    }

    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();
    let mut path = Vec::new();

    successors
        .keys()
        .find_map(|node| dfs(node, successors, &mut visited, &mut in_stack, &mut path))
}
