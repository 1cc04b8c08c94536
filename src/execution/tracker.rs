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

//! Tracks asynchronous executions through queued -> running -> terminal
//! states, with a bounded order list and bulk cancellation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::summarize;
use crate::error::TaskError;

const EXECUTION_HISTORY_CAPACITY: usize = 500;
const RESULT_SUMMARY_BYTES: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub mode: String,
    pub reason: String,
    pub stage: Option<String>,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl ExecutionRecord {
    fn queued(execution_id: String, mode: String, reason: String) -> Self {
        let now = Utc::now();
        Self {
            execution_id,
            mode,
            reason,
            stage: None,
            status: ExecutionStatus::Queued,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
        }
    }
}

/// The closure handed to `launch`: given the execution id it was assigned,
/// runs to completion and returns a result payload or a `TaskError`.
pub type RunFn = Arc<dyn Fn(String) -> BoxFuture<'static, Result<Value, TaskError>> + Send + Sync>;

/// Tracks every execution a manager has launched. Must be held behind an
/// `Arc` by callers — `launch`/`cancel_all` spawn tasks that need to reach
/// back into the tracker to update state as the run progresses.
pub struct ExecutionTracker {
    records: RwLock<HashMap<String, ExecutionRecord>>,
    order: RwLock<VecDeque<String>>,
    in_flight: RwLock<HashMap<String, JoinHandle<()>>>,
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            order: RwLock::new(VecDeque::with_capacity(EXECUTION_HISTORY_CAPACITY)),
            in_flight: RwLock::new(HashMap::new()),
        }
    }

    /// Generates a UUID, records it `queued`, and spawns the runner. The
    /// runner flips to `running`, awaits `run_fn`, and records a terminal
    /// state — always removing itself from the in-flight map, success or
    /// failure.
    pub fn launch(self: &Arc<Self>, mode: impl Into<String>, reason: impl Into<String>, run_fn: RunFn) -> String {
        let execution_id = Uuid::new_v4().to_string();
        let record = ExecutionRecord::queued(execution_id.clone(), mode.into(), reason.into());

        {
            let mut records = self.records.write();
            records.insert(execution_id.clone(), record);
        }
        {
            let mut order = self.order.write();
            order.push_front(execution_id.clone());
            order.truncate(EXECUTION_HISTORY_CAPACITY);
        }

        let tracker = self.clone();
        let id_for_runner = execution_id.clone();
        let handle = tokio::spawn(async move {
            tracker.set_status(&id_for_runner, ExecutionStatus::Running);
            info!(execution_id = %id_for_runner, "execution started");

            let outcome = run_fn(id_for_runner.clone()).await;

            match outcome {
                Ok(payload) => {
                    tracker.set_result(&id_for_runner, &payload);
                    info!(execution_id = %id_for_runner, "execution completed");
                }
                Err(err) => {
                    tracker.set_error(&id_for_runner, err.to_string());
                    warn!(execution_id = %id_for_runner, error = %err, "execution failed");
                }
            }

            tracker.in_flight.write().remove(&id_for_runner);
        });

        self.in_flight.write().insert(execution_id.clone(), handle);
        execution_id
    }

    fn set_status(&self, execution_id: &str, status: ExecutionStatus) {
        let mut records = self.records.write();
        if let Some(record) = records.get_mut(execution_id) {
            record.status = status;
            record.updated_at = Utc::now();
        }
    }

    fn set_result(&self, execution_id: &str, payload: &Value) {
        let mut records = self.records.write();
        if let Some(record) = records.get_mut(execution_id) {
            record.status = ExecutionStatus::Completed;
            record.result = Some(summarize(payload, RESULT_SUMMARY_BYTES));
            record.updated_at = Utc::now();
        }
    }

    fn set_error(&self, execution_id: &str, error: String) {
        let mut records = self.records.write();
        if let Some(record) = records.get_mut(execution_id) {
            record.status = ExecutionStatus::Failed;
            record.error = Some(error);
            record.updated_at = Utc::now();
        }
    }

    /// Merges a stage marker (or other caller-supplied fields) into a
    /// record, refreshing `updated_at`. Tasks use this to report progress
    /// through a multi-stage pipeline without otherwise mutating the
    /// tracker's own bookkeeping.
    pub fn set_stage(&self, execution_id: &str, stage: impl Into<String>) {
        let mut records = self.records.write();
        if let Some(record) = records.get_mut(execution_id) {
            record.stage = Some(stage.into());
            record.updated_at = Utc::now();
        }
    }

    pub fn get_status(&self, execution_id: &str) -> Value {
        let records = self.records.read();
        match records.get(execution_id) {
            Some(record) => serde_json::to_value(record).unwrap_or(Value::Null),
            None => serde_json::json!({ "status": "not_found", "execution_id": execution_id }),
        }
    }

    /// The `limit` most recently launched executions, newest first.
    pub fn list(&self, limit: usize) -> Vec<ExecutionRecord> {
        let order = self.order.read();
        let records = self.records.read();
        order
            .iter()
            .take(limit)
            .filter_map(|id| records.get(id).cloned())
            .collect()
    }

    /// Cancels every in-flight execution and awaits termination before
    /// marking each one `cancelled`. Results produced after cancellation
    /// (there are none, since the task is aborted) are discarded.
    pub async fn cancel_all(&self) {
        let drained: Vec<(String, JoinHandle<()>)> = {
            let mut in_flight = self.in_flight.write();
            in_flight.drain().collect()
        };

        for (execution_id, handle) in drained {
            handle.abort();
            if let Err(join_err) = handle.await {
                if !join_err.is_cancelled() {
                    error!(execution_id = %execution_id, error = %join_err, "execution runner panicked during cancel_all");
                }
            }
            self.set_status(&execution_id, ExecutionStatus::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn launch_reaches_a_terminal_state_exactly_once() {
        let tracker = Arc::new(ExecutionTracker::new());
        let id = tracker.launch(
            "long_study",
            "manual_trigger",
            Arc::new(|_id| Box::pin(async { Ok(json!({"ok": true})) })),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        let status = tracker.get_status(&id);
        assert_eq!(status["status"], "completed");
        assert_eq!(tracker.list(500).len(), 1);
    }

    #[tokio::test]
    async fn failing_run_fn_is_recorded_as_failed() {
        let tracker = Arc::new(ExecutionTracker::new());
        let id = tracker.launch(
            "long_study",
            "manual_trigger",
            Arc::new(|_id| {
                Box::pin(async {
                    Err(TaskError::ExecutionFailed {
                        message: "boom".into(),
                    })
                })
            }),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        let status = tracker.get_status(&id);
        assert_eq!(status["status"], "failed");
        assert!(status["error"].as_str().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn cancel_all_transitions_in_flight_executions_to_cancelled() {
        let tracker = Arc::new(ExecutionTracker::new());
        let id = tracker.launch(
            "long_study",
            "manual_trigger",
            Arc::new(|_id| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(json!({}))
                })
            }),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        tracker.cancel_all().await;

        let status = tracker.get_status(&id);
        assert_eq!(status["status"], "cancelled");
    }

    #[test]
    fn get_status_of_unknown_id_reports_not_found() {
        let tracker = ExecutionTracker::new();
        let status = tracker.get_status("missing");
        assert_eq!(status["status"], "not_found");
    }
}
