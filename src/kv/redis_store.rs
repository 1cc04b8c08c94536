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

//! `KvStore` backed by a Redis connection pool.

use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Pool};
use tracing::warn;

use super::KvStore;
use crate::error::PersistenceError;

/// Wraps a `deadpool_redis::Pool`. Cheap to clone — the pool itself is
/// reference counted, so managers can hand out `RedisKvStore` values
/// freely rather than sharing a single `Arc` wrapper.
#[derive(Clone)]
pub struct RedisKvStore {
    pool: Pool,
}

impl RedisKvStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, PersistenceError> {
        self.pool.get().await.map_err(|e| PersistenceError::Kv(e.to_string()))
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let mut conn = self.conn().await?;
        conn.get(key).await.map_err(|e| PersistenceError::Kv(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut conn = self.conn().await?;
        conn.set(key, value).await.map_err(|e| PersistenceError::Kv(e.to_string()))
    }

    async fn del(&self, key: &str) -> Result<(), PersistenceError> {
        let mut conn = self.conn().await?;
        conn.del(key).await.map_err(|e| PersistenceError::Kv(e.to_string()))
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut conn = self.conn().await?;
        conn.lpush(key, value).await.map_err(|e| PersistenceError::Kv(e.to_string()))
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut conn = self.conn().await?;
        conn.rpush(key, value).await.map_err(|e| PersistenceError::Kv(e.to_string()))
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, PersistenceError> {
        let mut conn = self.conn().await?;
        conn.lrange(key, start as i64 as isize, stop as i64 as isize)
            .await
            .map_err(|e| PersistenceError::Kv(e.to_string()))
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), PersistenceError> {
        let mut conn = self.conn().await?;
        conn.ltrim(key, start, stop).await.map_err(|e| PersistenceError::Kv(e.to_string()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), PersistenceError> {
        let mut conn = self.conn().await?;
        conn.hset(key, field, value).await.map_err(|e| PersistenceError::Kv(e.to_string()))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, PersistenceError> {
        let mut conn = self.conn().await?;
        conn.hget(key, field).await.map_err(|e| PersistenceError::Kv(e.to_string()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, PersistenceError> {
        let mut conn = self.conn().await?;
        conn.hgetall(key).await.map_err(|e| PersistenceError::Kv(e.to_string()))
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), PersistenceError> {
        let mut conn = self.conn().await?;
        conn.hdel(key, field).await.map_err(|e| PersistenceError::Kv(e.to_string()))
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, PersistenceError> {
        let mut conn = self.conn().await?;
        conn.hincr(key, field, delta).await.map_err(|e| PersistenceError::Kv(e.to_string()))
    }

    async fn expire(&self, key: &str, seconds: i64) -> Result<(), PersistenceError> {
        let mut conn = self.conn().await?;
        conn.expire(key, seconds as usize).await.map_err(|e| PersistenceError::Kv(e.to_string()))
    }
}

/// Builds a pool from a `redis://` URL, logging (but not failing hard on)
/// a misconfigured pool size — callers that need a guaranteed-reachable
/// store should follow up with a `PING` of their own.
pub fn pool_from_url(redis_url: &str) -> Result<Pool, PersistenceError> {
    let cfg = deadpool_redis::Config::from_url(redis_url);
    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1)).map_err(|e| {
        warn!(error = %e, "failed to build redis connection pool");
        PersistenceError::Kv(e.to_string())
    })
}
