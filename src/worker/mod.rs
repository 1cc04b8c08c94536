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

//! Worker primitives: background loops that fire triggers on timers or
//! conditions. All four expose a `run_loop(is_running)` that spawns a
//! cooperative tokio task, yielding at every tick so the owning manager's
//! other loops and the execution tracker keep making progress.

pub mod conditional;
pub mod feed_threshold;
pub mod hybrid;
pub mod interval;

pub use conditional::ConditionalCallbackWorker;
pub use feed_threshold::{FeedCacheEntry, FeedCacheThresholdWorker};
pub use hybrid::HybridWorker;
pub use interval::IntervalWorker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared running flag checked between ticks. Cloning shares the same
/// underlying flag; `stop()` on a manager flips it once for every worker
/// it owns.
pub type IsRunning = Arc<AtomicBool>;

pub fn new_running_flag(initial: bool) -> IsRunning {
    Arc::new(AtomicBool::new(initial))
}

pub(crate) fn is_running(flag: &IsRunning) -> bool {
    flag.load(Ordering::Relaxed)
}
