//! Dependency graph validation and ordering
//!
//! Every submitted item set is checked before anything runs: identities must
//! be unique, every dependency must name a submitted item, and the graph
//! must be acyclic.

use std::collections::{HashMap, HashSet};

use crate::domain::WorkItem;
use crate::error::ConfigError;

/// Validate an item set, returning the first problem found
///
/// Checks run in submission order so the reported error is deterministic.
pub fn validate_dependency_graph<T>(items: &[WorkItem<T>]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.id.as_str()) {
            return Err(ConfigError::DuplicateId(item.id.clone()));
        }
        if item.retries == 0 {
            return Err(ConfigError::ZeroRetries(item.id.clone()));
        }
    }

    for item in items {
        if let Some(dep) = item.dependencies.iter().find(|dep| !seen.contains(dep.as_str())) {
            return Err(ConfigError::UnknownDependency {
                item: item.id.clone(),
                dependency: dep.clone(),
            });
        }
    }

    let graph: HashMap<&str, &[String]> = items
        .iter()
        .map(|item| (item.id.as_str(), item.dependencies.as_slice()))
        .collect();

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut cycle_path = Vec::new();

    for item in items {
        let id = item.id.as_str();
        if !visited.contains(id) && has_cycle_dfs(id, &graph, &mut visited, &mut rec_stack, &mut cycle_path) {
            return Err(ConfigError::Cycle(cycle_path));
        }
    }

    Ok(())
}

/// Validate one item joining a running schedule
///
/// `known` answers whether an identity was already submitted. Since a new
/// item may only depend on existing ones it can never close a cycle.
pub fn validate_submission<T>(item: &WorkItem<T>, known: impl Fn(&str) -> bool) -> Result<(), ConfigError> {
    if known(&item.id) {
        return Err(ConfigError::DuplicateId(item.id.clone()));
    }
    if item.retries == 0 {
        return Err(ConfigError::ZeroRetries(item.id.clone()));
    }
    if item.dependencies.iter().any(|dep| dep == &item.id) {
        return Err(ConfigError::Cycle(vec![item.id.clone(), item.id.clone()]));
    }
    if let Some(dep) = item.dependencies.iter().find(|dep| !known(dep)) {
        return Err(ConfigError::UnknownDependency {
            item: item.id.clone(),
            dependency: dep.clone(),
        });
    }
    Ok(())
}

/// DFS helper for cycle detection
fn has_cycle_dfs<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, &'a [String]>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    cycle_path: &mut Vec<String>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    cycle_path.push(node.to_string());

    if let Some(deps) = graph.get(node) {
        for dep_id in deps.iter() {
            if rec_stack.contains(dep_id.as_str()) {
                cycle_path.push(dep_id.clone());
                return true;
            }
            if !visited.contains(dep_id.as_str())
                && graph.contains_key(dep_id.as_str())
                && has_cycle_dfs(dep_id.as_str(), graph, visited, rec_stack, cycle_path)
            {
                return true;
            }
        }
    }

    rec_stack.remove(node);
    cycle_path.pop();
    false
}

/// Topologically sort items by dependencies
///
/// Returns indices into `items` in execution order (dependencies first).
pub fn topological_sort<T>(items: &[WorkItem<T>]) -> Result<Vec<usize>, ConfigError> {
    validate_dependency_graph(items)?;

    let index_map: HashMap<&str, usize> = items.iter().enumerate().map(|(i, item)| (item.id.as_str(), i)).collect();

    let mut visited = HashSet::new();
    let mut result = Vec::with_capacity(items.len());

    for idx in 0..items.len() {
        topo_dfs_idx(idx, items, &index_map, &mut visited, &mut result);
    }

    Ok(result)
}

/// DFS helper for topological sort (returns indices)
fn topo_dfs_idx<T>(
    idx: usize,
    items: &[WorkItem<T>],
    index_map: &HashMap<&str, usize>,
    visited: &mut HashSet<usize>,
    result: &mut Vec<usize>,
) {
    if !visited.insert(idx) {
        return;
    }

    for dep_id in &items[idx].dependencies {
        if let Some(&dep_idx) = index_map.get(dep_id.as_str()) {
            topo_dfs_idx(dep_idx, items, index_map, visited, result);
        }
    }
    result.push(idx);
}
