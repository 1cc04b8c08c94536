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

//! Manager configuration: a process/runtime document loaded with
//! KV-store -> filesystem -> compiled-defaults precedence, mutated through
//! the trigger settings registry, and persisted back to both stores on
//! every successful mutation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::PersistenceError;
use crate::kv::{FilesystemMirror, KvStore};

/// A manager's full configuration document: a `process` section (tunables
/// read by the pipeline itself) and a `runtime` section (fields the
/// pipeline writes back, e.g. daily counters), plus the timestamp of the
/// last successful mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub process: Value,
    pub runtime: Value,
    pub last_updated: DateTime<Utc>,
}

impl ManagerConfig {
    pub fn with_defaults(process_defaults: Value, runtime_defaults: Value) -> Self {
        Self {
            process: process_defaults,
            runtime: runtime_defaults,
            last_updated: Utc::now(),
        }
    }
}

/// Loads and persists a single manager's [`ManagerConfig`], preferring the
/// KV store, falling back to the filesystem mirror, and finally to
/// compiled defaults if neither has anything.
pub struct ConfigStore {
    kv: Arc<dyn KvStore>,
    mirror: FilesystemMirror,
    kv_key: String,
    mirror_path: String,
}

impl ConfigStore {
    pub fn new(
        kv: Arc<dyn KvStore>,
        mirror: FilesystemMirror,
        kv_key: impl Into<String>,
        mirror_path: impl Into<String>,
    ) -> Self {
        Self {
            kv,
            mirror,
            kv_key: kv_key.into(),
            mirror_path: mirror_path.into(),
        }
    }

    /// Loads config with KV -> filesystem -> `defaults` precedence. A KV
    /// read failure (connection down) is logged and treated as "absent",
    /// not propagated — config load must never block manager startup.
    pub async fn load(&self, defaults: ManagerConfig) -> ManagerConfig {
        match self.kv.get(&self.kv_key).await {
            Ok(Some(raw)) => match serde_json::from_str::<ManagerConfig>(&raw) {
                Ok(cfg) => return cfg,
                Err(e) => warn!(key = %self.kv_key, error = %e, "stored config failed to deserialize, falling back"),
            },
            Ok(None) => {}
            Err(e) => warn!(key = %self.kv_key, error = %e, "config kv read failed, falling back to filesystem mirror"),
        }

        match self.mirror.read_json(&self.mirror_path) {
            Ok(Some(value)) => match serde_json::from_value::<ManagerConfig>(value) {
                Ok(cfg) => return cfg,
                Err(e) => warn!(path = %self.mirror_path, error = %e, "mirrored config failed to deserialize, using defaults"),
            },
            Ok(None) => {}
            Err(e) => warn!(path = %self.mirror_path, error = %e, "config mirror read failed, using defaults"),
        }

        info!(key = %self.kv_key, "no persisted config found, starting from compiled defaults");
        defaults
    }

    /// Persists `config` to the KV store first, then the filesystem
    /// mirror. A mirror failure is logged and swallowed; a KV failure is
    /// returned so the caller can decide whether the mutation still
    /// counts as durable.
    pub async fn save(&self, config: &ManagerConfig) -> Result<(), PersistenceError> {
        let serialized = serde_json::to_string(config)?;
        self.kv.set(&self.kv_key, &serialized).await?;

        let value = serde_json::to_value(config)?;
        self.mirror.write_json_best_effort(&self.mirror_path, &value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::filesystem::FilesystemMirror;
    use serde_json::json;
    use std::collections::HashMap;

    struct FakeKv {
        store: parking_lot::Mutex<HashMap<String, String>>,
        fail_get: bool,
    }

    impl FakeKv {
        fn new() -> Self {
            Self { store: parking_lot::Mutex::new(HashMap::new()), fail_get: false }
        }
        fn failing() -> Self {
            Self { store: parking_lot::Mutex::new(HashMap::new()), fail_get: true }
        }
    }

    #[async_trait::async_trait]
    impl KvStore for FakeKv {
        async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
            if self.fail_get {
                return Err(PersistenceError::Kv("connection refused".into()));
            }
            Ok(self.store.lock().get(key).cloned())
        }
        async fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
            self.store.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }
        async fn del(&self, key: &str) -> Result<(), PersistenceError> {
            self.store.lock().remove(key);
            Ok(())
        }
        async fn lpush(&self, _: &str, _: &str) -> Result<(), PersistenceError> { Ok(()) }
        async fn rpush(&self, _: &str, _: &str) -> Result<(), PersistenceError> { Ok(()) }
        async fn lrange(&self, _: &str, _: isize, _: isize) -> Result<Vec<String>, PersistenceError> { Ok(vec![]) }
        async fn ltrim(&self, _: &str, _: isize, _: isize) -> Result<(), PersistenceError> { Ok(()) }
        async fn hset(&self, _: &str, _: &str, _: &str) -> Result<(), PersistenceError> { Ok(()) }
        async fn hget(&self, _: &str, _: &str) -> Result<Option<String>, PersistenceError> { Ok(None) }
        async fn hgetall(&self, _: &str) -> Result<HashMap<String, String>, PersistenceError> { Ok(HashMap::new()) }
        async fn hdel(&self, _: &str, _: &str) -> Result<(), PersistenceError> { Ok(()) }
        async fn hincrby(&self, _: &str, _: &str, delta: i64) -> Result<i64, PersistenceError> { Ok(delta) }
        async fn expire(&self, _: &str, _: i64) -> Result<(), PersistenceError> { Ok(()) }
    }

    fn defaults() -> ManagerConfig {
        ManagerConfig::with_defaults(json!({"cycle_hours": 4}), json!({"trades_today": 0}))
    }

    #[tokio::test]
    async fn loads_from_kv_when_present() {
        let kv = Arc::new(FakeKv::new());
        let dir = tempfile::tempdir().unwrap();
        let mirror = FilesystemMirror::new(dir.path());
        let store = ConfigStore::new(kv.clone(), mirror, "dex:config", "dex/config.json");

        let saved = defaults();
        store.save(&saved).await.unwrap();

        let loaded = store.load(ManagerConfig::with_defaults(json!({}), json!({}))).await;
        assert_eq!(loaded.process, saved.process);
    }

    #[tokio::test]
    async fn falls_back_to_mirror_when_kv_read_fails() {
        let kv = Arc::new(FakeKv::failing());
        let dir = tempfile::tempdir().unwrap();
        let mirror = FilesystemMirror::new(dir.path());
        let mirror_value = serde_json::to_value(defaults()).unwrap();
        mirror.write_json("dex/config.json", &mirror_value).unwrap();

        let store = ConfigStore::new(kv, mirror, "dex:config", "dex/config.json");
        let loaded = store.load(ManagerConfig::with_defaults(json!({}), json!({}))).await;
        assert_eq!(loaded.process, json!({"cycle_hours": 4}));
    }

    #[tokio::test]
    async fn falls_back_to_defaults_when_nothing_persisted() {
        let kv = Arc::new(FakeKv::new());
        let dir = tempfile::tempdir().unwrap();
        let mirror = FilesystemMirror::new(dir.path());
        let store = ConfigStore::new(kv, mirror, "dex:config", "dex/config.json");

        let loaded = store.load(defaults()).await;
        assert_eq!(loaded.process, json!({"cycle_hours": 4}));
    }
}
