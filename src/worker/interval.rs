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

//! Fires a single callback on a configurable, live-mutable interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{error, trace};

use super::{is_running, IsRunning};
use crate::error::TaskError;

pub type IntervalCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

/// Invokes `callback` every `interval_seconds`, floored at
/// `min_interval_seconds`. Exceptions from the callback are logged and the
/// loop continues; the interval may be updated live between ticks.
pub struct IntervalWorker {
    interval_seconds: AtomicU64,
    min_interval_seconds: u64,
    callback: IntervalCallback,
    label: String,
}

impl IntervalWorker {
    pub fn new(
        label: impl Into<String>,
        interval_seconds: u64,
        min_interval_seconds: u64,
        callback: IntervalCallback,
    ) -> Self {
        Self {
            interval_seconds: AtomicU64::new(interval_seconds.max(min_interval_seconds)),
            min_interval_seconds,
            callback,
            label: label.into(),
        }
    }

    /// The interval actually used for the next sleep.
    pub fn effective_interval(&self) -> Duration {
        let raw = self.interval_seconds.load(Ordering::Relaxed);
        Duration::from_secs(raw.max(self.min_interval_seconds))
    }

    /// Updates the interval; observed by the loop on its next tick.
    pub fn set_interval_seconds(&self, seconds: u64) {
        self.interval_seconds.store(seconds, Ordering::Relaxed);
    }

    /// Spawns the loop as a cancellable tokio task. The loop checks
    /// `is_running` before sleeping and again after waking, so `stop()`
    /// is observed within at most one interval.
    pub fn run_loop(self: Arc<Self>, is_running_flag: IsRunning) -> JoinHandle<()> {
        tokio::spawn(async move {
            while is_running(&is_running_flag) {
                tokio::time::sleep(self.effective_interval()).await;
                if !is_running(&is_running_flag) {
                    break;
                }
                trace!(worker = %self.label, "interval tick");
                if let Err(err) = (self.callback)().await {
                    error!(worker = %self.label, error = %err, "interval worker callback failed");
                }
            }
        })
    }
}
