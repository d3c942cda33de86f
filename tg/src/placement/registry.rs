//! NodeRegistry - least-loaded placement of tasks onto capable nodes

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::PlacementError;

use super::node::{NodeRecord, Resources};

/// Registry of execution nodes and the tasks placed on them
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, NodeRecord>,
    /// Node ids in registration order
    order: Vec<String>,
    /// task id -> node id, for outstanding tasks only
    assignments: HashMap<String, String>,
    /// node id -> outstanding task ids, oldest first
    outstanding: HashMap<String, VecDeque<String>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node, or replace the capabilities of a known one
    ///
    /// A re-registered node keeps its counters and registration order.
    pub fn register(&mut self, node_id: impl Into<String>, capabilities: Resources) {
        let node_id = node_id.into();
        debug!(%node_id, ?capabilities, "NodeRegistry::register: called");

        if let Some(node) = self.nodes.get_mut(&node_id) {
            debug!(%node_id, "NodeRegistry::register: replacing capabilities");
            node.capabilities = capabilities;
            node.last_heartbeat = Utc::now();
            return;
        }

        let record = NodeRecord::new(node_id.clone(), capabilities, self.order.len());
        self.order.push(node_id.clone());
        self.nodes.insert(node_id.clone(), record);
        info!(%node_id, "Node registered");
    }

    /// Pick the least-loaded node offering every requirement
    ///
    /// Ties go to the node registered first. Returns `None` when no node is
    /// eligible. A task that is still outstanding keeps its node and is not
    /// counted again.
    pub fn assign(&mut self, task_id: impl Into<String>, requirements: &Resources) -> Option<String> {
        let task_id = task_id.into();
        debug!(%task_id, ?requirements, "NodeRegistry::assign: called");

        if let Some(node_id) = self.assignments.get(&task_id) {
            warn!(%task_id, %node_id, "Task already outstanding, keeping its node");
            return Some(node_id.clone());
        }

        let mut best: Option<(&str, f64)> = None;
        for node_id in &self.order {
            let Some(node) = self.nodes.get(node_id) else {
                continue;
            };
            if !node.satisfies(requirements) {
                continue;
            }
            let score = node.score();
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((node_id.as_str(), score));
            }
        }

        let Some((node_id, _)) = best else {
            warn!(%task_id, "No eligible node for task");
            return None;
        };
        let node_id = node_id.to_string();

        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.tasks_assigned += 1;
        }
        self.outstanding
            .entry(node_id.clone())
            .or_default()
            .push_back(task_id.clone());
        self.assignments.insert(task_id.clone(), node_id.clone());
        info!(%task_id, %node_id, "Task assigned");
        Some(node_id)
    }

    /// Record that a task on `node_id` finished
    ///
    /// Without a task id the oldest outstanding task on the node is the one
    /// released.
    pub fn report_completion(&mut self, node_id: &str) -> Result<(), PlacementError> {
        debug!(%node_id, "NodeRegistry::report_completion: called");
        if !self.nodes.contains_key(node_id) {
            return Err(PlacementError::UnknownNode(node_id.to_string()));
        }

        let task_id = self
            .outstanding
            .get_mut(node_id)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| PlacementError::NoOutstandingTasks(node_id.to_string()))?;
        debug!(%node_id, %task_id, "NodeRegistry::report_completion: released oldest task");
        self.assignments.remove(&task_id);
        self.mark_completed(node_id);
        Ok(())
    }

    /// Record completion of a task by its id, resolving the node it ran on
    pub fn report_task_completion(&mut self, task_id: &str) -> Result<String, PlacementError> {
        debug!(%task_id, "NodeRegistry::report_task_completion: called");
        let node_id = self
            .assignments
            .remove(task_id)
            .ok_or_else(|| PlacementError::UnknownTask(task_id.to_string()))?;

        if let Some(tasks) = self.outstanding.get_mut(&node_id) {
            tasks.retain(|id| id != task_id);
        }
        self.mark_completed(&node_id);
        Ok(node_id)
    }

    fn mark_completed(&mut self, node_id: &str) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.tasks_completed += 1;
        }
    }

    /// Record a liveness report from a node
    pub fn heartbeat(&mut self, node_id: &str) -> Result<DateTime<Utc>, PlacementError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| PlacementError::UnknownNode(node_id.to_string()))?;
        node.last_heartbeat = Utc::now();
        Ok(node.last_heartbeat)
    }

    /// Outstanding task ids on a node, oldest first
    pub fn outstanding(&self, node_id: &str) -> Vec<&str> {
        self.outstanding
            .get(node_id)
            .map(|tasks| tasks.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Node currently holding a task
    pub fn node_for_task(&self, task_id: &str) -> Option<&str> {
        self.assignments.get(task_id).map(String::as_str)
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeRecord> {
        self.nodes.get(node_id)
    }

    /// Outstanding tasks on a node
    pub fn load(&self, node_id: &str) -> Option<u64> {
        self.nodes.get(node_id).map(NodeRecord::load)
    }

    /// Nodes in registration order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// [`NodeRegistry`] behind a mutex for concurrent callers
#[derive(Debug, Clone, Default)]
pub struct SharedNodeRegistry {
    inner: Arc<Mutex<NodeRegistry>>,
}

impl SharedNodeRegistry {
    pub fn new(registry: NodeRegistry) -> Self {
        Self {
            inner: Arc::new(Mutex::new(registry)),
        }
    }

    pub async fn register(&self, node_id: impl Into<String>, capabilities: Resources) {
        self.inner.lock().await.register(node_id, capabilities);
    }

    pub async fn assign(&self, task_id: impl Into<String>, requirements: &Resources) -> Option<String> {
        self.inner.lock().await.assign(task_id, requirements)
    }

    pub async fn report_completion(&self, node_id: &str) -> Result<(), PlacementError> {
        self.inner.lock().await.report_completion(node_id)
    }

    pub async fn report_task_completion(&self, task_id: &str) -> Result<String, PlacementError> {
        self.inner.lock().await.report_task_completion(task_id)
    }

    pub async fn heartbeat(&self, node_id: &str) -> Result<DateTime<Utc>, PlacementError> {
        self.inner.lock().await.heartbeat(node_id)
    }

    pub async fn node_for_task(&self, task_id: &str) -> Option<String> {
        self.inner.lock().await.node_for_task(task_id).map(str::to_string)
    }

    pub async fn load(&self, node_id: &str) -> Option<u64> {
        self.inner.lock().await.load(node_id)
    }

    /// Copy of every node record in registration order
    pub async fn snapshot(&self) -> Vec<NodeRecord> {
        self.inner.lock().await.nodes().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::node::resources;
    use proptest::prelude::*;

    fn cluster() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register("n1", resources([("cpu", 4.0), ("memory", 8.0)]));
        registry.register("n2", resources([("cpu", 8.0), ("memory", 16.0), ("gpu", 1.0)]));
        registry
    }

    #[test]
    fn test_least_loaded_with_tie_to_first_registered() {
        let mut registry = cluster();
        let req = resources([("cpu", 2.0)]);

        assert_eq!(registry.assign("t1", &req).as_deref(), Some("n1"));
        assert_eq!(registry.assign("t2", &req).as_deref(), Some("n2"));
        assert_eq!(registry.assign("t3", &req).as_deref(), Some("n1"));
        assert_eq!(registry.load("n1"), Some(2));
        assert_eq!(registry.load("n2"), Some(1));
    }

    #[test]
    fn test_only_capable_node_eligible() {
        let mut registry = cluster();
        let req = resources([("gpu", 1.0)]);

        assert_eq!(registry.assign("t1", &req).as_deref(), Some("n2"));
        assert_eq!(registry.assign("t2", &req).as_deref(), Some("n2"));
    }

    #[test]
    fn test_no_eligible_node() {
        let mut registry = cluster();
        assert!(registry.assign("t1", &resources([("cpu", 64.0)])).is_none());
        assert!(registry.assign("t2", &resources([("tpu", 1.0)])).is_none());
        assert!(NodeRegistry::new().assign("t3", &Resources::new()).is_none());
        assert_eq!(registry.load("n1"), Some(0));
    }

    #[test]
    fn test_completion_lowers_load() {
        let mut registry = cluster();
        let req = resources([("cpu", 1.0)]);
        registry.assign("t1", &req);
        registry.assign("t2", &req);

        registry.report_completion("n1").unwrap();
        assert_eq!(registry.load("n1"), Some(0));
        assert_eq!(registry.node("n1").unwrap().tasks_completed, 1);
        assert_eq!(registry.assign("t3", &req).as_deref(), Some("n1"));
    }

    #[test]
    fn test_completion_errors() {
        let mut registry = cluster();
        assert_eq!(
            registry.report_completion("ghost"),
            Err(PlacementError::UnknownNode("ghost".into()))
        );
        assert_eq!(
            registry.report_completion("n1"),
            Err(PlacementError::NoOutstandingTasks("n1".into()))
        );
        assert_eq!(
            registry.report_task_completion("t9"),
            Err(PlacementError::UnknownTask("t9".into()))
        );
    }

    #[test]
    fn test_task_completion_by_id() {
        let mut registry = cluster();
        registry.assign("t1", &resources([("gpu", 1.0)]));
        assert_eq!(registry.node_for_task("t1"), Some("n2"));

        assert_eq!(registry.report_task_completion("t1").unwrap(), "n2");
        assert_eq!(registry.node_for_task("t1"), None);
        assert_eq!(registry.load("n2"), Some(0));
    }

    #[test]
    fn test_completion_by_node_releases_oldest_task() {
        let mut registry = NodeRegistry::new();
        registry.register("n1", resources([("cpu", 4.0)]));
        let req = resources([("cpu", 1.0)]);

        assert_eq!(registry.assign("t1", &req).as_deref(), Some("n1"));
        registry.report_completion("n1").unwrap();
        assert_eq!(registry.node_for_task("t1"), None);

        assert_eq!(registry.assign("t2", &req).as_deref(), Some("n1"));
        assert_eq!(
            registry.report_task_completion("t1"),
            Err(PlacementError::UnknownTask("t1".into()))
        );
        assert_eq!(registry.load("n1"), Some(1));
        assert_eq!(registry.outstanding("n1"), vec!["t2"]);

        assert_eq!(registry.report_task_completion("t2").unwrap(), "n1");
        assert_eq!(registry.load("n1"), Some(0));
        assert_eq!(registry.node("n1").unwrap().tasks_completed, 2);
    }

    #[test]
    fn test_completion_by_id_leaves_other_tasks() {
        let mut registry = NodeRegistry::new();
        registry.register("n1", resources([("cpu", 4.0)]));
        let req = resources([("cpu", 1.0)]);
        registry.assign("t1", &req);
        registry.assign("t2", &req);
        registry.assign("t3", &req);

        registry.report_task_completion("t2").unwrap();
        assert_eq!(registry.outstanding("n1"), vec!["t1", "t3"]);
        registry.report_completion("n1").unwrap();
        assert_eq!(registry.outstanding("n1"), vec!["t3"]);
        assert_eq!(registry.node_for_task("t1"), None);
        assert_eq!(registry.node_for_task("t3"), Some("n1"));
    }

    #[test]
    fn test_reassign_outstanding_task_keeps_node() {
        let mut registry = cluster();
        let req = resources([("cpu", 1.0)]);

        assert_eq!(registry.assign("t1", &req).as_deref(), Some("n1"));
        assert_eq!(registry.assign("t1", &req).as_deref(), Some("n1"));
        assert_eq!(registry.load("n1"), Some(1));
        assert_eq!(registry.load("n2"), Some(0));

        registry.report_task_completion("t1").unwrap();
        assert_eq!(registry.load("n1"), Some(0));
        assert_eq!(
            registry.report_task_completion("t1"),
            Err(PlacementError::UnknownTask("t1".into()))
        );
        // a finished task id may be placed again
        assert_eq!(registry.assign("t1", &req).as_deref(), Some("n1"));
    }

    #[test]
    fn test_reregister_keeps_counters_and_order() {
        let mut registry = cluster();
        registry.assign("t1", &resources([("cpu", 1.0)]));
        registry.register("n1", resources([("cpu", 1.0)]));

        let ids: Vec<_> = registry.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n1", "n2"]);
        assert_eq!(registry.load("n1"), Some(1));
        assert_eq!(registry.node("n1").unwrap().capabilities.len(), 1);
    }

    #[test]
    fn test_heartbeat() {
        let mut registry = cluster();
        let before = registry.node("n1").unwrap().last_heartbeat;
        let at = registry.heartbeat("n1").unwrap();
        assert!(at >= before);
        assert!(registry.heartbeat("ghost").is_err());
    }

    #[tokio::test]
    async fn test_shared_registry_concurrent_assign() {
        let shared = SharedNodeRegistry::new(cluster());
        let mut handles = Vec::new();
        for i in 0..20 {
            let shared = shared.clone();
            handles.push(tokio::spawn(async move {
                shared.assign(format!("t{}", i), &resources([("cpu", 1.0)])).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }

        let nodes = shared.snapshot().await;
        let total: u64 = nodes.iter().map(|n| n.tasks_assigned).sum();
        assert_eq!(total, 20);
        assert_eq!(nodes[0].load(), 10);
        assert_eq!(nodes[1].load(), 10);
    }

    proptest! {
        #[test]
        fn prop_assigned_never_below_completed(ops in prop::collection::vec((any::<bool>(), 0usize..3), 0..60)) {
            let mut registry = NodeRegistry::new();
            for n in 0..3 {
                registry.register(format!("n{}", n), resources([("cpu", 4.0)]));
            }

            for (i, (assign, node)) in ops.into_iter().enumerate() {
                if assign {
                    registry.assign(format!("t{}", i), &resources([("cpu", 1.0)]));
                } else {
                    let _ = registry.report_completion(&format!("n{}", node));
                }
                for record in registry.nodes() {
                    prop_assert!(record.tasks_assigned >= record.tasks_completed);
                    prop_assert_eq!(record.load() as usize, registry.outstanding(&record.id).len());
                }
            }
        }
    }
}
