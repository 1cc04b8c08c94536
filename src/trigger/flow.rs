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

//! Dispatch table from trigger id to resolver, with a bounded invocation
//! history ring used as the UI's audit trail.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{error, info};

use crate::error::TriggerError;
use crate::task::SchedulerType;

const TRIGGER_HISTORY_CAPACITY: usize = 500;

/// A resolver closure: receives the invocation's kwargs as a JSON object
/// and returns a partial result document (the registry fills in
/// `status`/`started_at`/`completed_at`/`trigger_id` around it).
pub type TriggerResolver =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, TriggerError>> + Send + Sync>;

/// A registered trigger flow.
#[derive(Clone)]
pub struct TriggerFlowSpec {
    pub trigger_id: String,
    pub pipeline: String,
    pub system_name: String,
    pub scheduler_type: SchedulerType,
    pub description: String,
    pub input_schema: Option<Value>,
    pub resolver: TriggerResolver,
}

impl std::fmt::Debug for TriggerFlowSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerFlowSpec")
            .field("trigger_id", &self.trigger_id)
            .field("pipeline", &self.pipeline)
            .field("system_name", &self.system_name)
            .field("scheduler_type", &self.scheduler_type)
            .finish()
    }
}

/// Dispatches `run_trigger_flow(trigger_id, kwargs)` calls to the
/// registered resolver and keeps a bounded history of every invocation.
pub struct TriggerFlowRegistry {
    flows: RwLock<HashMap<String, TriggerFlowSpec>>,
    history: RwLock<VecDeque<Value>>,
}

impl Default for TriggerFlowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerFlowRegistry {
    pub fn new() -> Self {
        Self {
            flows: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::with_capacity(TRIGGER_HISTORY_CAPACITY)),
        }
    }

    /// Indexes the given flows by `trigger_id`, overwriting existing
    /// entries with the same id.
    pub fn register_many(&self, flows: Vec<TriggerFlowSpec>) {
        let mut guard = self.flows.write();
        for flow in flows {
            guard.insert(flow.trigger_id.clone(), flow);
        }
    }

    /// Metadata for every registered flow, sorted by `trigger_id`.
    pub fn list(&self) -> Vec<TriggerFlowSpec> {
        let guard = self.flows.read();
        let mut rows: Vec<TriggerFlowSpec> = guard.values().cloned().collect();
        rows.sort_by(|a, b| a.trigger_id.cmp(&b.trigger_id));
        rows
    }

    /// The most recent invocations, newest first.
    pub fn history(&self, limit: usize) -> Vec<Value> {
        self.history.read().iter().take(limit).cloned().collect()
    }

    /// Looks up and invokes `trigger_id`'s resolver with `kwargs`,
    /// producing a structured result document and appending it to history.
    /// Unknown trigger ids and resolver failures both produce a terminal
    /// `failed` document rather than an `Err` — nothing escapes this
    /// method as a `Result`.
    pub async fn run(&self, trigger_id: &str, kwargs: Value) -> Value {
        let started_at = Utc::now();

        let resolver = {
            let guard = self.flows.read();
            guard.get(trigger_id).map(|f| f.resolver.clone())
        };

        let doc = match resolver {
            None => {
                error!(trigger_id, "unknown trigger flow");
                serde_json::json!({
                    "status": "failed",
                    "error": "unknown_trigger_flow",
                    "trigger_id": trigger_id,
                    "started_at": started_at.to_rfc3339(),
                    "completed_at": Utc::now().to_rfc3339(),
                })
            }
            Some(resolver) => match resolver(kwargs).await {
                Ok(mut payload) => {
                    if !payload.is_object() {
                        payload = serde_json::json!({ "value": payload });
                    }
                    if let Value::Object(ref mut map) = payload {
                        map.entry("status")
                            .or_insert(Value::String("completed".into()));
                        map.insert("trigger_id".into(), Value::String(trigger_id.into()));
                        map.insert(
                            "started_at".into(),
                            Value::String(started_at.to_rfc3339()),
                        );
                        map.insert(
                            "completed_at".into(),
                            Value::String(Utc::now().to_rfc3339()),
                        );
                    }
                    info!(trigger_id, "trigger flow completed");
                    payload
                }
                Err(err) => {
                    error!(trigger_id, error = %err, "trigger flow failed");
                    serde_json::json!({
                        "status": "failed",
                        "error": err.to_string(),
                        "trigger_id": trigger_id,
                        "started_at": started_at.to_rfc3339(),
                        "completed_at": Utc::now().to_rfc3339(),
                    })
                }
            },
        };

        let mut history = self.history.write();
        history.push_front(doc.clone());
        history.truncate(TRIGGER_HISTORY_CAPACITY);

        doc
    }
}
