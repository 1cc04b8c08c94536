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

//! Filesystem JSON mirror: the fallback a manager writes to alongside
//! Redis so that config and feed-cache state survive a Redis outage.
//! Mirror failures are logged and swallowed — the in-memory and Redis
//! paths remain the source of truth.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::warn;

use crate::error::PersistenceError;

#[derive(Clone)]
pub struct FilesystemMirror {
    base_dir: PathBuf,
}

impl FilesystemMirror {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn resolve(&self, relative_path: &str) -> PathBuf {
        self.base_dir.join(relative_path)
    }

    /// Pretty-prints `value` to `relative_path` under the base directory,
    /// creating parent directories as needed.
    pub fn write_json(&self, relative_path: &str, value: &Value) -> Result<(), PersistenceError> {
        let path = self.resolve(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PersistenceError::Filesystem {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let rendered = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, rendered).map_err(|source| PersistenceError::Filesystem { path, source })
    }

    pub fn read_json(&self, relative_path: &str) -> Result<Option<Value>, PersistenceError> {
        let path = self.resolve(relative_path);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistenceError::Filesystem { path, source }),
        }
    }

    /// Best-effort write used by callers that must not fail their own
    /// operation just because the mirror is unavailable (a full disk, a
    /// read-only mount). Logs at WARN and moves on.
    pub fn write_json_best_effort(&self, relative_path: &str, value: &Value) {
        if let Err(e) = self.write_json(relative_path, value) {
            warn!(path = relative_path, error = %e, "filesystem mirror write failed");
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}
