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

//! Two distinct trigger-related registries, easy to conflate by name:
//!
//! - [`flow::TriggerFlowRegistry`] dispatches a trigger id to a resolver
//!   closure that (usually) runs a subset of a [`crate::task_flow_hub::TaskFlowHub`].
//! - [`settings::TriggerSettingsRegistry`] maps `pipeline.trigger` keys to
//!   a typed configuration schema with extract/apply adapters, independent
//!   of whether that trigger is currently dispatched through a flow.

pub mod flow;
pub mod settings;

pub use flow::{TriggerFlowRegistry, TriggerFlowSpec, TriggerResolver};
pub use settings::{TriggerSettingsRegistry, TriggerSettingsSpec};
