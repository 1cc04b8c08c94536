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

//! Registers named worker loops and starts/stops them together as a unit.

use std::collections::HashMap;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

pub type RunnerFactory = std::sync::Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Registers named runners (e.g. one per `IntervalWorker`/
/// `ConditionalCallbackWorker` the manager owns) and starts/stops them as
/// a group.
pub struct HybridWorker {
    runners: RwLock<HashMap<String, RunnerFactory>>,
    handles: RwLock<HashMap<String, JoinHandle<()>>>,
}

impl Default for HybridWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl HybridWorker {
    pub fn new() -> Self {
        Self {
            runners: RwLock::new(HashMap::new()),
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, name: impl Into<String>, factory: RunnerFactory) {
        self.runners.write().insert(name.into(), factory);
    }

    /// Starts every registered runner that isn't already running.
    /// Starting an already-running runner is a no-op.
    pub fn start(&self) {
        let runners: Vec<(String, RunnerFactory)> = self.runners.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let mut handles = self.handles.write();
        for (name, factory) in runners {
            if handles.contains_key(&name) {
                continue;
            }
            debug!(runner = %name, "starting hybrid worker runner");
            let fut = factory();
            handles.insert(name, tokio::spawn(fut));
        }
    }

    /// Cancels every running runner and awaits termination.
    pub async fn stop(&self) {
        let drained: Vec<(String, JoinHandle<()>)> = {
            let mut handles = self.handles.write();
            handles.drain().collect()
        };
        for (name, handle) in drained {
            handle.abort();
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    tracing::warn!(runner = %name, error = %err, "hybrid worker runner panicked");
                }
            }
        }
    }

    pub fn running_names(&self) -> Vec<String> {
        self.handles.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn start_is_idempotent_for_a_running_runner() {
        let worker = HybridWorker::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let starts_clone = starts.clone();
        worker.register(
            "loop",
            Arc::new(move || {
                starts_clone.fetch_add(1, Ordering::SeqCst);
                Box::pin(async {
                    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                })
            }),
        );
        worker.start();
        worker.start();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        worker.stop().await;
    }

    #[tokio::test]
    async fn stop_cancels_and_clears_all_runners() {
        let worker = HybridWorker::new();
        worker.register(
            "a",
            Arc::new(|| {
                Box::pin(async {
                    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                })
            }),
        );
        worker.register(
            "b",
            Arc::new(|| {
                Box::pin(async {
                    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                })
            }),
        );
        worker.start();
        assert_eq!(worker.running_names().len(), 2);
        worker.stop().await;
        assert!(worker.running_names().is_empty());
    }
}
