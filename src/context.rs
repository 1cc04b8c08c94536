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

//! Typed key-value execution context threaded through task and trigger calls.
//!
//! `Context<T>` is a thin, ordered-insertion wrapper around `HashMap<String,
//! T>`. Tasks read what upstream stages wrote and append their own
//! contribution; the hub never inspects the contents itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ContextError;

/// Execution context passed into task executors and trigger resolvers.
///
/// Insertion is fallible by design: a task that accidentally reuses a key
/// already written by an upstream dependency gets a `ContextError` rather
/// than silently clobbering it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context<T> {
    data: HashMap<String, T>,
}

impl<T> Context<T> {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Creates a context pre-populated from an existing map.
    pub fn from_map(data: HashMap<String, T>) -> Self {
        Self { data }
    }

    /// Inserts a new key. Fails if the key is already present.
    pub fn insert(&mut self, key: impl Into<String>, value: T) -> Result<(), ContextError> {
        let key = key.into();
        if self.data.contains_key(&key) {
            return Err(ContextError::DuplicateKey(key));
        }
        self.data.insert(key, value);
        Ok(())
    }

    /// Inserts or overwrites a key unconditionally.
    pub fn update(&mut self, key: impl Into<String>, value: T) {
        self.data.insert(key.into(), value);
    }

    /// Reads a key.
    pub fn get(&self, key: &str) -> Option<&T> {
        self.data.get(key)
    }

    /// Removes and returns a key's value, if present.
    pub fn remove(&mut self, key: &str) -> Option<T> {
        self.data.remove(key)
    }

    /// Whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Consumes the context, returning the underlying map.
    pub fn into_data(self) -> HashMap<String, T> {
        self.data
    }

    /// Borrows the underlying map.
    pub fn data(&self) -> &HashMap<String, T> {
        &self.data
    }
}

impl Context<Value> {
    /// Convenience constructor for JSON-valued contexts merged from a
    /// pre-built document (e.g. the kwargs a trigger resolver was invoked
    /// with).
    pub fn from_json_map(value: Value) -> Self {
        let data = match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        Self { data }
    }

    /// Serializes the context as a single JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(self.data.clone().into_iter().collect())
    }
}
