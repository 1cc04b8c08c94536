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

//! Pipeline orchestration core for long-lived trading managers.
//!
//! A manager (see [`manager::DexManager`], [`manager::PolymarketManager`])
//! composes a [`task_flow_hub::TaskFlowHub`] (dependency-ordered task
//! registry and runner), a [`trigger::flow::TriggerFlowRegistry`] (trigger
//! id to resolver dispatch, with a bounded history ring), a
//! [`trigger::settings::TriggerSettingsRegistry`] (typed config surfaces),
//! an [`execution::ExecutionTracker`] (async run lifecycle), and a set of
//! [`worker`] primitives that fire triggers on timers or conditions. State
//! is persisted through [`kv::KvStore`] with a [`kv::FilesystemMirror`]
//! fallback, and structured events flow through [`event::EventLogger`].
//!
//! The core itself never talks to a chain, an LLM, or an exchange: those
//! are [`collaborators`] traits a manager holds as `Arc<dyn Trait>` and a
//! [`task::Task`] implementation calls into.
//!
//! [`service::boot`] is the entry point an embedding process calls before
//! constructing managers: it seeds the process-wide trigger settings
//! registry and resolves the operator config directory.

pub mod collaborators;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod execution;
pub mod kv;
pub mod manager;
pub mod service;
pub mod task;
pub mod task_flow_hub;
pub mod trigger;
pub mod worker;

pub use error::FlowHubError;
pub use manager::{DexManager, PolymarketManager};
pub use service::{boot, ServiceBoot};
