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

//! Interfaces to the collaborating subsystems a manager orchestrates but
//! does not itself implement: the analysis workforce, swap execution, and
//! wallet/watchlist bookkeeping. Managers hold these as trait objects so
//! the pipeline core stays independent of any one trading stack.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TaskError;

/// The pool of analysis/decision agents a pipeline stage delegates to.
/// Each stage calls `process_task_async` first, falling back to
/// `process_task`, and finally to `run` — the first method the
/// implementor actually provides wins. A workforce providing none of the
/// three yields a `{status: skipped, reason: workforce_no_method}`
/// document rather than an error.
#[async_trait]
pub trait Workforce: Send + Sync {
    async fn process_task_async(&self, _task_name: &str, _payload: Value) -> Option<Result<Value, TaskError>> {
        None
    }

    async fn process_task(&self, _task_name: &str, _payload: Value) -> Option<Result<Value, TaskError>> {
        None
    }

    async fn run(&self, _task_name: &str, _payload: Value) -> Option<Result<Value, TaskError>> {
        None
    }

    /// Runs the fallback chain described above, returning the
    /// `workforce_no_method` skip document if nothing responded.
    async fn dispatch(&self, task_name: &str, payload: Value) -> Result<Value, TaskError> {
        if let Some(result) = self.process_task_async(task_name, payload.clone()).await {
            return result;
        }
        if let Some(result) = self.process_task(task_name, payload.clone()).await {
            return result;
        }
        if let Some(result) = self.run(task_name, payload).await {
            return result;
        }
        Ok(crate::task::skipped_doc("workforce_no_method"))
    }
}

/// On-chain swap execution and exit-order bookkeeping.
#[async_trait]
pub trait SwapClient: Send + Sync {
    async fn quote_exact_in(&self, token_in: &str, token_out: &str, amount_in: f64) -> Result<Value, TaskError>;

    async fn execute_watchlist_exit(&self, position_id: &str, reason: &str) -> Result<Value, TaskError>;

    async fn register_stop_loss_take_profit(
        &self,
        position_id: &str,
        stop_loss_pct: f64,
        take_profit_pct: f64,
    ) -> Result<Value, TaskError>;
}

/// Watchlist evaluation: per-position trigger checks plus the
/// global-portfolio ROI check that can redirect a whole cycle.
#[async_trait]
pub trait WatchlistToolkit: Send + Sync {
    async fn list_positions(&self) -> Result<Vec<Value>, TaskError>;

    async fn close_position(&self, position_id: &str, reason: &str) -> Result<Value, TaskError>;

    async fn evaluate_triggers(&self, position: &Value) -> Result<Value, TaskError>;

    /// Evaluates the portfolio-wide ROI trigger; `Some(doc)` indicates the
    /// trigger fired and the returned document should redirect the cycle.
    async fn evaluate_global_roi_trigger(&self) -> Result<Option<Value>, TaskError>;
}

/// Wallet state and feedback used by the review/decision stages.
#[async_trait]
pub trait WalletToolkit: Send + Sync {
    async fn get_wallet_feedback(&self) -> Result<Value, TaskError>;

    async fn get_global_wallet_state(&self) -> Result<Value, TaskError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct SilentWorkforce;
    #[async_trait]
    impl Workforce for SilentWorkforce {}

    struct AsyncWorkforce;
    #[async_trait]
    impl Workforce for AsyncWorkforce {
        async fn process_task_async(&self, _task_name: &str, _payload: Value) -> Option<Result<Value, TaskError>> {
            Some(Ok(json!({"status": "completed", "via": "async"})))
        }
    }

    struct SyncFallbackWorkforce;
    #[async_trait]
    impl Workforce for SyncFallbackWorkforce {
        async fn process_task(&self, _task_name: &str, _payload: Value) -> Option<Result<Value, TaskError>> {
            Some(Ok(json!({"status": "completed", "via": "sync"})))
        }
    }

    #[tokio::test]
    async fn dispatch_skips_when_no_method_is_provided() {
        let workforce = SilentWorkforce;
        let result = workforce.dispatch("token_exploration", json!({})).await.unwrap();
        assert_eq!(result["status"], "skipped");
        assert_eq!(result["reason"], "workforce_no_method");
    }

    #[tokio::test]
    async fn dispatch_prefers_process_task_async() {
        let workforce = AsyncWorkforce;
        let result = workforce.dispatch("token_exploration", json!({})).await.unwrap();
        assert_eq!(result["via"], "async");
    }

    #[tokio::test]
    async fn dispatch_falls_back_to_process_task() {
        let workforce = SyncFallbackWorkforce;
        let result = workforce.dispatch("token_exploration", json!({})).await.unwrap();
        assert_eq!(result["via"], "sync");
    }
}
