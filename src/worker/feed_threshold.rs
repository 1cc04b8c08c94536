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

//! Bounded dictionary of recently observed feed items, gating a pipeline on
//! a review threshold (Polymarket's `market_batch` trigger).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tracked feed item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedCacheEntry {
    pub id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub exhausted: bool,
    pub data: Value,
}

pub type IdOf = Arc<dyn Fn(&Value) -> String + Send + Sync>;
pub type EntryBuilder =
    Arc<dyn Fn(&Value, Option<&FeedCacheEntry>, DateTime<Utc>) -> FeedCacheEntry + Send + Sync>;
pub type IsEntryActive = Arc<dyn Fn(&FeedCacheEntry) -> bool + Send + Sync>;

/// The default "active" predicate: an entry is active as long as it has
/// not been marked exhausted.
pub fn default_is_active() -> IsEntryActive {
    Arc::new(|entry| !entry.exhausted)
}

pub struct FeedCacheThresholdWorker {
    entries: RwLock<HashMap<String, FeedCacheEntry>>,
    max_cache: usize,
    threshold: usize,
    id_of: IdOf,
    entry_builder: EntryBuilder,
    is_entry_active: IsEntryActive,
}

impl FeedCacheThresholdWorker {
    pub fn new(
        max_cache: usize,
        threshold: usize,
        id_of: IdOf,
        entry_builder: EntryBuilder,
        is_entry_active: IsEntryActive,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_cache,
            threshold,
            id_of,
            entry_builder,
            is_entry_active,
        }
    }

    /// Builds/refreshes an entry for every item, drops entries the active
    /// predicate rejects, then — if still over `max_cache` — keeps only
    /// the most-recently-seen `max_cache` entries.
    pub fn update(&self, items: &[Value]) {
        let now = Utc::now();
        let mut guard = self.entries.write();

        for item in items {
            let id = (self.id_of)(item);
            let existing = guard.get(&id).cloned();
            let entry = (self.entry_builder)(item, existing.as_ref(), now);
            guard.insert(id, entry);
        }

        guard.retain(|_, entry| (self.is_entry_active)(entry));

        if guard.len() > self.max_cache {
            let mut all: Vec<FeedCacheEntry> = guard.values().cloned().collect();
            all.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.id.cmp(&b.id)));
            all.truncate(self.max_cache);
            *guard = all.into_iter().map(|e| (e.id.clone(), e)).collect();
        }
    }

    pub fn pending_items(&self) -> Vec<FeedCacheEntry> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ready(&self) -> bool {
        self.len() >= self.threshold
    }

    /// Flips `exhausted` for the given ids, then runs a no-op `update` so
    /// the active-entry filter prunes them. This two-step is the only
    /// path by which an entry leaves the cache via exhaustion.
    pub fn mark_processed(&self, ids: &[String]) {
        {
            let mut guard = self.entries.write();
            for id in ids {
                if let Some(entry) = guard.get_mut(id) {
                    entry.exhausted = true;
                }
            }
        }
        self.update(&[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn worker(max_cache: usize, threshold: usize) -> FeedCacheThresholdWorker {
        FeedCacheThresholdWorker::new(
            max_cache,
            threshold,
            Arc::new(|item| item["id"].as_str().unwrap().to_string()),
            Arc::new(|item, existing, now| FeedCacheEntry {
                id: item["id"].as_str().unwrap().to_string(),
                first_seen: existing.map(|e| e.first_seen).unwrap_or(now),
                last_seen: now,
                exhausted: existing.map(|e| e.exhausted).unwrap_or(false),
                data: item.clone(),
            }),
            default_is_active(),
        )
    }

    #[test]
    fn caps_size_keeping_most_recently_seen() {
        let w = worker(2, 1);
        w.update(&[json!({"id": "a"})]);
        std::thread::sleep(std::time::Duration::from_millis(2));
        w.update(&[json!({"id": "b"})]);
        std::thread::sleep(std::time::Duration::from_millis(2));
        w.update(&[json!({"id": "c"})]);

        let ids: Vec<String> = w.pending_items().into_iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"b".to_string()));
        assert!(ids.contains(&"c".to_string()));
        assert!(!ids.contains(&"a".to_string()));
    }

    #[test]
    fn ready_reflects_threshold() {
        let w = worker(10, 2);
        assert!(!w.ready());
        w.update(&[json!({"id": "a"}), json!({"id": "b"})]);
        assert!(w.ready());
    }

    #[test]
    fn mark_processed_prunes_via_noop_update() {
        let w = worker(10, 1);
        w.update(&[json!({"id": "a"}), json!({"id": "b"})]);
        assert_eq!(w.len(), 2);
        w.mark_processed(&["a".to_string()]);
        let ids: Vec<String> = w.pending_items().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["b".to_string()]);
    }

    #[test]
    fn refreshing_an_existing_entry_preserves_first_seen() {
        let w = worker(10, 1);
        w.update(&[json!({"id": "a"})]);
        let first_seen = w.pending_items()[0].first_seen;
        std::thread::sleep(std::time::Duration::from_millis(2));
        w.update(&[json!({"id": "a"})]);
        let refreshed = w.pending_items().into_iter().find(|e| e.id == "a").unwrap();
        assert_eq!(refreshed.first_seen, first_seen);
        assert!(refreshed.last_seen >= first_seen);
    }
}
