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

//! Asynchronous execution tracking: queued/running/terminal lifecycle,
//! result summarisation, and bulk cancellation.

pub mod tracker;

pub use tracker::{ExecutionRecord, ExecutionStatus, ExecutionTracker, RunFn};

/// Truncates a JSON-serialised value to `max_bytes`, appending a
/// `"...(truncated)"` marker that survives through to the UI when it does.
pub fn summarize(value: &serde_json::Value, max_bytes: usize) -> String {
    let serialized = serde_json::to_string(value).unwrap_or_else(|_| value.to_string());
    if serialized.len() <= max_bytes {
        return serialized;
    }
    let marker = "...(truncated)";
    let budget = max_bytes.saturating_sub(marker.len());
    let mut cut = budget.min(serialized.len());
    while !serialized.is_char_boundary(cut) && cut > 0 {
        cut -= 1;
    }
    format!("{}{}", &serialized[..cut], marker)
}
