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

//! The two long-lived manager shells (DEX, Polymarket) built on the
//! shared task-flow/trigger-flow/worker/execution primitives.

pub mod dex;
pub mod polymarket;

pub use dex::DexManager;
pub use polymarket::PolymarketManager;

use serde::{Deserialize, Serialize};

/// Which path a trigger flow takes through the task-flow hub: a full
/// multi-stage study, or a fast decision-only pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewMode {
    LongStudy,
    FastDecision,
}

impl ReviewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewMode::LongStudy => "long_study",
            ReviewMode::FastDecision => "fast_decision",
        }
    }
}

impl std::fmt::Display for ReviewMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
