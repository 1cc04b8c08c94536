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

//! Fetches a batch of items, filters them with a condition, and invokes a
//! callback for each survivor in order.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, trace};

use super::{is_running, IsRunning};
use crate::error::TaskError;

pub type FetchItems = Arc<dyn Fn() -> BoxFuture<'static, Vec<Value>> + Send + Sync>;
pub type Condition = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub type OnItem = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

pub struct ConditionalCallbackWorker {
    fetch_items: FetchItems,
    condition: Condition,
    on_item: OnItem,
    label: String,
}

impl ConditionalCallbackWorker {
    pub fn new(
        label: impl Into<String>,
        fetch_items: FetchItems,
        condition: Condition,
        on_item: OnItem,
    ) -> Self {
        Self {
            fetch_items,
            condition,
            on_item,
            label: label.into(),
        }
    }

    /// Runs a single fetch/filter/dispatch pass. Returns the number of
    /// items dispatched. Items are processed in fetch order.
    pub async fn run_once(&self) -> usize {
        let items = (self.fetch_items)().await;
        let mut dispatched = 0;
        for item in items {
            if (self.condition)(&item) {
                if let Err(err) = (self.on_item)(item).await {
                    error!(worker = %self.label, error = %err, "conditional worker callback failed");
                }
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Spawns a loop that runs one pass per `interval_seconds` tick.
    pub fn run_loop(self: Arc<Self>, is_running_flag: IsRunning, interval_seconds: u64) -> JoinHandle<()> {
        tokio::spawn(async move {
            while is_running(&is_running_flag) {
                tokio::time::sleep(Duration::from_secs(interval_seconds)).await;
                if !is_running(&is_running_flag) {
                    break;
                }
                let dispatched = self.run_once().await;
                trace!(worker = %self.label, dispatched, "conditional worker tick");
            }
        })
    }
}
