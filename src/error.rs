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

//! Error types for the flowhub orchestration core.
//!
//! Errors are split along the boundary drawn in the design notes: registration
//! errors are surfaced to the caller immediately, while dispatch-time failures
//! (a task executor panicking, a trigger resolver raising) are captured into
//! `status: failed` result documents and never escape `TaskFlowHub::run` or
//! `TriggerFlowRegistry::run` as a `Result::Err`.

use thiserror::Error;

/// Errors raised while registering tasks, triggers, or trigger settings.
#[derive(Error, Debug, Clone)]
pub enum RegistrationError {
    #[error("task '{0}' declares a dependency on unregistered task '{1}'")]
    MissingDependency(String, String),

    #[error("registering task '{0}' would introduce a dependency cycle: {1:?}")]
    CyclicDependency(String, Vec<String>),

    #[error("trigger settings key '{0}' is already registered")]
    DuplicateTriggerSettings(String),

    #[error("unknown trigger settings key '{0}'")]
    UnknownTriggerSettings(String),
}

/// Errors returned by `Context` operations.
#[derive(Error, Debug, Clone)]
pub enum ContextError {
    #[error("key '{0}' already exists in context")]
    DuplicateKey(String),

    #[error("failed to serialize value for key '{0}': {1}")]
    SerializationFailed(String, String),
}

/// Errors a task executor may return. These never propagate out of
/// `TaskFlowHub::run` — they are caught and converted into a `{status:
/// failed, error}` document.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    #[error("task execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("context error: {0}")]
    Context(#[from] ContextError),

    #[error("collaborator call failed: {0}")]
    Collaborator(String),
}

/// Errors a trigger resolver may return. These never propagate out of
/// `TriggerFlowRegistry::run` — they become a terminal `failed` history
/// entry instead.
#[derive(Error, Debug, Clone)]
pub enum TriggerError {
    #[error("trigger resolution failed: {message}")]
    ResolutionFailed { message: String },

    #[error("collaborator call failed: {0}")]
    Collaborator(String),
}

/// Errors raised when a trigger settings payload fails validation. `apply`
/// always validates before mutating, so a `SettingsError` guarantees the
/// config was left untouched.
#[derive(Error, Debug, Clone)]
pub enum SettingsError {
    #[error("field '{field}' out of range: {message}")]
    OutOfRange { field: String, message: String },

    #[error("field '{field}' has the wrong type: {message}")]
    WrongType { field: String, message: String },

    #[error("unknown field '{0}'")]
    UnknownField(String),
}

/// Errors surfaced by the key-value / filesystem persistence layer. Callers
/// are expected to log and continue — persistence failures never block an
/// in-memory state update (see the design notes' propagation policy).
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("key-value store error: {0}")]
    Kv(String),

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize persisted document: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Runtime invariant violations raised by manager/tracker constructors.
/// Unlike the other kinds, these are meant to abort initialisation rather
/// than degrade gracefully.
#[derive(Error, Debug, Clone)]
pub enum InitError {
    #[error("duplicate task id '{0}' registered with different specs")]
    DuplicateTask(String),

    #[error("registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("missing required collaborator: {0}")]
    MissingCollaborator(String),

    #[error("failed to load operator config override at {path}: {message}")]
    ConfigLoad { path: std::path::PathBuf, message: String },
}

/// Top-level error type for fallible public APIs that are not steady-state
/// dispatch (construction, registration, configuration).
#[derive(Error, Debug)]
pub enum FlowHubError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Init(#[from] InitError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
