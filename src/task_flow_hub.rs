/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Dependency-ordered registry and runner for pipeline tasks.
//!
//! Order resolution mirrors a DFS over the dependency graph: for each
//! selected task (visited in sorted order for determinism), walk its
//! dependency closure and append each id the first time its visit
//! completes, emitting only ids that are part of the selection. Unlike the
//! system this hub is modeled on, cycles are rejected at registration time
//! (see `register_many`) rather than silently truncated here — by the time
//! `run` walks the graph, it is already known to be acyclic.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::NodeIndex;
use petgraph::{Directed, Graph};
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::RegistrationError;
use crate::task::{completed_doc, failed_doc, skipped_doc, Task, TaskFlowSpec};

/// Dependency-ordered registry and runner of pipeline tasks.
pub struct TaskFlowHub {
    tasks: RwLock<HashMap<String, Arc<dyn Task>>>,
}

impl Default for TaskFlowHub {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskFlowHub {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a single task. Equivalent to `register_many([task])`.
    pub fn register(&self, task: Arc<dyn Task>) -> Result<(), RegistrationError> {
        self.register_many(vec![task])
    }

    /// Registers a batch of tasks, overwriting any existing entries with
    /// the same `task_id` (idempotent re-registration). Validates that
    /// every dependency (old and new) resolves within the combined
    /// registry, and that the combined graph is acyclic, before committing
    /// anything — a failed batch leaves the hub unchanged.
    pub fn register_many(&self, new_tasks: Vec<Arc<dyn Task>>) -> Result<(), RegistrationError> {
        let mut tasks = self.tasks.write();

        let mut combined: HashMap<String, Arc<dyn Task>> = tasks.clone();
        for task in &new_tasks {
            combined.insert(task.task_id().to_string(), task.clone());
        }

        for task in combined.values() {
            for dep in task.dependencies() {
                if !combined.contains_key(dep) {
                    return Err(RegistrationError::MissingDependency(
                        task.task_id().to_string(),
                        dep.clone(),
                    ));
                }
            }
        }

        if let Some(cycle) = find_cycle(&combined) {
            let offending = new_tasks
                .first()
                .map(|t| t.task_id().to_string())
                .unwrap_or_default();
            return Err(RegistrationError::CyclicDependency(offending, cycle));
        }

        for task in new_tasks {
            debug!(task_id = task.task_id(), "registering task");
            tasks.insert(task.task_id().to_string(), task);
        }
        Ok(())
    }

    /// Returns every registered task's spec, sorted by `task_id`.
    pub fn list(&self, flags: &HashMap<String, bool>) -> Vec<TaskFlowSpec> {
        let tasks = self.tasks.read();
        let mut rows: Vec<TaskFlowSpec> = tasks
            .values()
            .map(|t| TaskFlowSpec::from_task(t.as_ref(), flags))
            .collect();
        rows.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        rows
    }

    /// Resolves dependency order over `selected_ids` (defaulting to the
    /// full registry) and runs each selected task's executor in that
    /// order, returning one result document per task.
    pub async fn run(
        &self,
        trigger_type: &str,
        mut context: Context<Value>,
        flags: &HashMap<String, bool>,
        selected_ids: Option<Vec<String>>,
    ) -> HashMap<String, Value> {
        let tasks = self.tasks.read().clone();

        let selection: HashSet<String> = match selected_ids {
            Some(ids) => ids.into_iter().collect(),
            None => tasks.keys().cloned().collect(),
        };

        let order = resolve_order(&tasks, &selection);

        let mut results: HashMap<String, Value> = HashMap::new();
        for task_id in order {
            let task = match tasks.get(&task_id) {
                Some(t) => t.clone(),
                None => continue,
            };

            let doc = if !task.trigger_types().is_empty()
                && !task.trigger_types().contains(trigger_type)
            {
                skipped_doc("trigger_mismatch")
            } else if !task.is_enabled(flags) {
                skipped_doc("disabled")
            } else {
                let dependency_failed = task.dependencies().iter().any(|dep| {
                    results
                        .get(dep)
                        .and_then(crate::task::doc_status)
                        .map(|s| s == "failed")
                        .unwrap_or(false)
                });

                if dependency_failed {
                    skipped_doc("dependency_failed")
                } else {
                    match task.execute(&mut context).await {
                        Ok(payload) => completed_doc(payload),
                        Err(err) => {
                            warn!(task_id = %task_id, error = %err, "task executor failed");
                            failed_doc(err)
                        }
                    }
                }
            };

            results.insert(task_id, doc);
        }

        results
    }
}

/// Resolves the DFS post-order over `selection`'s dependency closure,
/// emitting only ids that are in `selection`.
fn resolve_order(tasks: &HashMap<String, Arc<dyn Task>>, selection: &HashSet<String>) -> Vec<String> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut visiting = HashSet::new();

    let mut roots: Vec<&String> = selection.iter().collect();
    roots.sort();

    for id in roots {
        visit(id, tasks, selection, &mut visited, &mut visiting, &mut order);
    }

    order
}

fn visit(
    id: &str,
    tasks: &HashMap<String, Arc<dyn Task>>,
    selection: &HashSet<String>,
    visited: &mut HashSet<String>,
    visiting: &mut HashSet<String>,
    order: &mut Vec<String>,
) {
    if visited.contains(id) {
        return;
    }
    if visiting.contains(id) {
        // Registration-time cycle rejection means this should be
        // unreachable; abort this branch rather than recurse forever.
        return;
    }
    visiting.insert(id.to_string());

    if let Some(task) = tasks.get(id) {
        let mut deps: Vec<String> = task.dependencies().to_vec();
        deps.sort();
        for dep in deps {
            visit(&dep, tasks, selection, visited, visiting, order);
        }
    }

    visiting.remove(id);
    visited.insert(id.to_string());

    if selection.contains(id) {
        order.push(id.to_string());
    }
}

/// Returns a cycle (as a list of task ids) if the registry's dependency
/// graph contains one, using petgraph the way the rest of the codebase
/// does its cycle detection.
fn find_cycle(tasks: &HashMap<String, Arc<dyn Task>>) -> Option<Vec<String>> {
    let mut graph = Graph::<String, (), Directed>::new();
    let mut indices: HashMap<String, NodeIndex> = HashMap::new();

    for id in tasks.keys() {
        let idx = graph.add_node(id.clone());
        indices.insert(id.clone(), idx);
    }

    for task in tasks.values() {
        let from = indices[task.task_id()];
        for dep in task.dependencies() {
            if let Some(&to) = indices.get(dep) {
                graph.add_edge(to, from, ());
            }
        }
    }

    if !is_cyclic_directed(&graph) {
        return None;
    }

    // Graph is known cyclic; find one concrete cycle via a DFS rec-stack
    // walk for a readable error message.
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();
    for id in tasks.keys() {
        if !visited.contains(id) {
            if let Some(cycle) = dfs_find_cycle(id, tasks, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(cycle);
            }
        }
    }
    None
}

fn dfs_find_cycle(
    id: &str,
    tasks: &HashMap<String, Arc<dyn Task>>,
    visited: &mut HashSet<String>,
    rec_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    visited.insert(id.to_string());
    rec_stack.insert(id.to_string());
    path.push(id.to_string());

    if let Some(task) = tasks.get(id) {
        for dep in task.dependencies() {
            if !visited.contains(dep) {
                if let Some(cycle) = dfs_find_cycle(dep, tasks, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep) {
                let start = path.iter().position(|x| x == dep).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(dep.clone());
                return Some(cycle);
            }
        }
    }

    rec_stack.remove(id);
    path.pop();
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct StubTask {
        id: String,
        deps: Vec<String>,
        fail: bool,
    }

    #[async_trait]
    impl Task for StubTask {
        fn task_id(&self) -> &str {
            &self.id
        }
        fn pipeline(&self) -> &str {
            "test"
        }
        fn system_name(&self) -> &str {
            "test"
        }
        fn trigger_types(&self) -> &HashSet<String> {
            static EMPTY: once_cell::sync::Lazy<HashSet<String>> =
                once_cell::sync::Lazy::new(HashSet::new);
            &EMPTY
        }
        fn scheduler_type(&self) -> crate::task::SchedulerType {
            crate::task::SchedulerType::Manual
        }
        fn dependencies(&self) -> &[String] {
            &self.deps
        }
        async fn execute(
            &self,
            _context: &mut Context<Value>,
        ) -> Result<Value, crate::error::TaskError> {
            if self.fail {
                Err(crate::error::TaskError::ExecutionFailed {
                    message: "boom".into(),
                })
            } else {
                Ok(json!({ "value": self.id }))
            }
        }
    }

    fn stub(id: &str, deps: &[&str]) -> Arc<dyn Task> {
        Arc::new(StubTask {
            id: id.to_string(),
            deps: deps.iter().map(|s| s.to_string()).collect(),
            fail: false,
        })
    }

    #[tokio::test]
    async fn dependency_chain_runs_in_order() {
        let hub = TaskFlowHub::new();
        hub.register_many(vec![stub("a", &[]), stub("b", &["a"]), stub("c", &["b"])])
            .unwrap();

        let results = hub
            .run(
                "t",
                Context::new(),
                &HashMap::new(),
                Some(vec!["c".to_string()]),
            )
            .await;

        assert_eq!(results.len(), 3);
        for id in ["a", "b", "c"] {
            assert_eq!(
                crate::task::doc_status(&results[id]),
                Some("completed"),
                "{id} should complete"
            );
        }
    }

    #[tokio::test]
    async fn failed_dependency_propagates_as_skip() {
        let hub = TaskFlowHub::new();
        hub.register(Arc::new(StubTask {
            id: "a".into(),
            deps: vec![],
            fail: true,
        }))
        .unwrap();
        hub.register_many(vec![stub("b", &["a"]), stub("c", &["b"])])
            .unwrap();

        let results = hub
            .run(
                "t",
                Context::new(),
                &HashMap::new(),
                Some(vec!["c".to_string()]),
            )
            .await;

        assert_eq!(crate::task::doc_status(&results["a"]), Some("failed"));
        assert_eq!(crate::task::doc_status(&results["b"]), Some("skipped"));
        assert_eq!(results["b"]["reason"], json!("dependency_failed"));
        assert_eq!(crate::task::doc_status(&results["c"]), Some("skipped"));
    }

    #[test]
    fn missing_dependency_rejected_at_registration() {
        let hub = TaskFlowHub::new();
        let err = hub.register(stub("b", &["a"])).unwrap_err();
        assert!(matches!(err, RegistrationError::MissingDependency(_, _)));
    }

    #[test]
    fn cycle_rejected_at_registration() {
        let hub = TaskFlowHub::new();
        let err = hub
            .register_many(vec![stub("a", &["b"]), stub("b", &["a"])])
            .unwrap_err();
        assert!(matches!(err, RegistrationError::CyclicDependency(_, _)));
    }

    #[tokio::test]
    async fn re_registration_is_idempotent() {
        let hub = TaskFlowHub::new();
        hub.register(stub("a", &[])).unwrap();
        hub.register(stub("a", &[])).unwrap();
        assert_eq!(hub.list(&HashMap::new()).len(), 1);
    }
}
