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

//! Structured event log a manager appends to as it runs: mirrored through
//! `tracing` for operators tailing logs, and kept in a bounded in-memory
//! ring for the UI to poll without reaching into the KV store.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

const IN_MEMORY_CAPACITY: usize = 500;

/// Matches the credential shapes that tend to end up in task payloads and
/// error messages (API keys, bearer tokens, inline `key=value`/`key:value`
/// secrets) so they never reach the event ring or the mirrored KV logs.
static API_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"sk-[a-zA-Z0-9-_]{20,}").unwrap());
static BEARER_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"Bearer\s+[a-zA-Z0-9-_.]+").unwrap());
static KV_SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)["']?(api_key|apikey|token|secret|password)["']?\s*[:=]\s*["']?([a-zA-Z0-9-_.]{8,})["']?"#).unwrap()
});

/// Redacts credential-shaped substrings from a log message before it is
/// emitted or retained. Best-effort: it is a log-hygiene backstop, not a
/// substitute for not logging secrets in the first place.
fn scrub_secrets(message: &str) -> String {
    let scrubbed = API_KEY_PATTERN.replace_all(message, "[API_KEY_REDACTED]");
    let scrubbed = BEARER_PATTERN.replace_all(&scrubbed, "Bearer [TOKEN_REDACTED]");
    KV_SECRET_PATTERN
        .replace_all(&scrubbed, |caps: &regex::Captures| format!("{}=[REDACTED]", &caps[1]))
        .into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub level: EventLevel,
    pub message: String,
    pub context: Value,
    pub timestamp: DateTime<Utc>,
}

/// Appends structured events to a bounded ring, emitting each one through
/// `tracing` at the matching level. One instance is shared per manager.
pub struct EventLogger {
    name: &'static str,
    ring: Mutex<VecDeque<Event>>,
}

impl EventLogger {
    /// `name` identifies the owning manager in emitted `tracing` spans
    /// (e.g. `"dex"`, `"polymarket"`).
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ring: Mutex::new(VecDeque::with_capacity(IN_MEMORY_CAPACITY)),
        }
    }

    pub fn log(&self, level: EventLevel, message: impl Into<String>, context: Value) {
        let message = scrub_secrets(&message.into());
        match level {
            EventLevel::Info => info!(manager = self.name, %message, %context, "event"),
            EventLevel::Warn => warn!(manager = self.name, %message, %context, "event"),
            EventLevel::Error => error!(manager = self.name, %message, %context, "event"),
        }

        let level_label = match level {
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
        };
        metrics::counter!("flowhub_events_total", "manager" => self.name, "level" => level_label).increment(1);

        let event = Event {
            level,
            message,
            context,
            timestamp: Utc::now(),
        };
        let mut ring = self.ring.lock();
        ring.push_front(event);
        ring.truncate(IN_MEMORY_CAPACITY);
    }

    pub fn info(&self, message: impl Into<String>, context: Value) {
        self.log(EventLevel::Info, message, context);
    }

    pub fn warn(&self, message: impl Into<String>, context: Value) {
        self.log(EventLevel::Warn, message, context);
    }

    pub fn error(&self, message: impl Into<String>, context: Value) {
        self.log(EventLevel::Error, message, context);
    }

    /// The `limit` most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        self.ring.lock().iter().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recent_returns_newest_first_and_respects_limit() {
        let logger = EventLogger::new("dex");
        logger.info("cycle started", json!({"n": 1}));
        logger.warn("slow stage", json!({"n": 2}));
        logger.error("stage failed", json!({"n": 3}));

        let recent = logger.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "stage failed");
        assert_eq!(recent[1].message, "slow stage");
    }

    #[tracing_test::traced_test]
    #[test]
    fn log_emits_through_tracing_with_secrets_redacted() {
        let logger = EventLogger::new("dex");
        logger.error("token=abcdefghijklmnop leaked in response", json!({}));
        assert!(tracing_test::logs_contain("REDACTED"));
        assert!(!tracing_test::logs_contain("abcdefghijklmnop"));
    }

    #[test]
    fn log_redacts_api_keys_and_bearer_tokens() {
        let logger = EventLogger::new("dex");
        logger.warn(
            "workforce call failed: Authorization: Bearer sk-ant-REDACTED",
            json!({}),
        );
        let recent = logger.recent(1);
        assert!(!recent[0].message.contains("sk-ant-REDACTED"));
        assert!(recent[0].message.contains("REDACTED"));
    }

    #[test]
    fn ring_is_capped_at_capacity() {
        let logger = EventLogger::new("dex");
        for i in 0..(IN_MEMORY_CAPACITY + 10) {
            logger.info(format!("event {i}"), json!({}));
        }
        assert_eq!(logger.recent(IN_MEMORY_CAPACITY + 10).len(), IN_MEMORY_CAPACITY);
    }
}
