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

//! Redis-compatible key-value store abstraction, plus the filesystem JSON
//! mirror managers fall back to for config and the Polymarket feed cache.

pub mod filesystem;
pub mod redis_store;

pub use filesystem::FilesystemMirror;
pub use redis_store::RedisKvStore;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::PersistenceError;

/// The subset of Redis semantics the core relies on. Implementations are
/// expected to be cheap to clone (a connection pool handle, not a raw
/// connection) since every manager call goes through this trait.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
    async fn del(&self, key: &str) -> Result<(), PersistenceError>;

    async fn lpush(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
    async fn rpush(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, PersistenceError>;
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), PersistenceError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), PersistenceError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, PersistenceError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, PersistenceError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<(), PersistenceError>;
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, PersistenceError>;

    async fn expire(&self, key: &str, seconds: i64) -> Result<(), PersistenceError>;
}

/// Pushes `value` onto `key` (newest-first, `lpush`) and trims to
/// `capacity` — the pattern every capped history list in the data model
/// (`dex:logs`, `…:cycles`, `…:tasks`, `…:trades`) follows.
pub async fn push_capped(
    kv: &dyn KvStore,
    key: &str,
    value: &str,
    capacity: usize,
) -> Result<(), PersistenceError> {
    kv.lpush(key, value).await?;
    kv.ltrim(key, 0, capacity as isize - 1).await
}
