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

//! Pipeline task trait and the registration-time spec derived from it.
//!
//! A pipeline task is anything implementing [`Task`]. `TaskFlowHub` stores
//! tasks as trait objects and derives a [`TaskFlowSpec`] row from each one
//! on demand for `list()` — the spec is a read-only projection, not a
//! separate thing callers construct by hand.

use std::collections::HashMap;
use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::error::TaskError;

/// How a task (or trigger) is expected to be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerType {
    Interval,
    Event,
    Manual,
}

/// A single pipeline task. Implementors are registered with a
/// [`crate::task_flow_hub::TaskFlowHub`] by `task_id`.
#[async_trait]
pub trait Task: Send + Sync {
    /// Unique identifier within the owning manager.
    fn task_id(&self) -> &str;

    /// The pipeline this task belongs to (e.g. `"dex"`, `"polymarket"`).
    fn pipeline(&self) -> &str;

    /// The owning system's name, used for event/log attribution.
    fn system_name(&self) -> &str;

    /// Trigger types this task accepts. An empty set means "any".
    fn trigger_types(&self) -> &HashSet<String>;

    fn scheduler_type(&self) -> SchedulerType;

    /// Upstream task ids this task depends on.
    fn dependencies(&self) -> &[String];

    fn description(&self) -> &str {
        ""
    }

    fn input_schema(&self) -> Option<Value> {
        None
    }

    fn output_schema(&self) -> Option<Value> {
        None
    }

    /// Whether this task should run given the current flag overrides.
    /// Default: looks up `flags[task_id]`, defaulting to enabled.
    fn is_enabled(&self, flags: &HashMap<String, bool>) -> bool {
        flags.get(self.task_id()).copied().unwrap_or(true)
    }

    /// Runs the task body. A returned `Err` is caught by the hub and
    /// converted into a `{status: failed, error}` document — it never
    /// propagates out of `TaskFlowHub::run`.
    async fn execute(&self, context: &mut Context<Value>) -> Result<Value, TaskError>;
}

/// Read-only projection of a registered task, as returned by
/// `TaskFlowHub::list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFlowSpec {
    pub task_id: String,
    pub pipeline: String,
    pub system_name: String,
    pub trigger_types: HashSet<String>,
    pub scheduler_type: SchedulerType,
    pub dependencies: Vec<String>,
    pub description: String,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub enabled: bool,
}

impl TaskFlowSpec {
    pub fn from_task(task: &dyn Task, flags: &HashMap<String, bool>) -> Self {
        Self {
            task_id: task.task_id().to_string(),
            pipeline: task.pipeline().to_string(),
            system_name: task.system_name().to_string(),
            trigger_types: task.trigger_types().clone(),
            scheduler_type: task.scheduler_type(),
            dependencies: task.dependencies().to_vec(),
            description: task.description().to_string(),
            input_schema: task.input_schema(),
            output_schema: task.output_schema(),
            enabled: task.is_enabled(flags),
        }
    }
}

/// Builds a `{status: completed, ...}` document, merging `status` in only
/// if the executor's own payload didn't already set one.
pub fn completed_doc(mut payload: Value) -> Value {
    if !payload.is_object() {
        payload = serde_json::json!({ "value": payload });
    }
    if let Value::Object(ref mut map) = payload {
        map.entry("status").or_insert(Value::String("completed".into()));
    }
    payload
}

/// Builds a `{status: skipped, reason: ...}` document.
pub fn skipped_doc(reason: &str) -> Value {
    serde_json::json!({ "status": "skipped", "reason": reason })
}

/// Builds a `{status: failed, error: ...}` document.
pub fn failed_doc(error: impl std::fmt::Display) -> Value {
    serde_json::json!({ "status": "failed", "error": error.to_string() })
}

/// Reads the `status` field of a result document, if present.
pub fn doc_status(doc: &Value) -> Option<&str> {
    doc.get("status").and_then(Value::as_str)
}
