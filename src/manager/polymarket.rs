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

//! The Polymarket prediction-market manager: a feed-cache-gated batch
//! scan with a daily trade limit and a single-flight scan mutex.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::collaborators::Workforce;
use crate::config::ConfigStore;
use crate::context::Context;
use crate::error::{TaskError, TriggerError};
use crate::event::EventLogger;
use crate::task::{skipped_doc, SchedulerType, Task};
use crate::task_flow_hub::TaskFlowHub;
use crate::trigger::flow::{TriggerFlowRegistry, TriggerFlowSpec};
use crate::trigger::settings::TriggerSettingsRegistry;
use crate::worker::{new_running_flag, FeedCacheEntry, FeedCacheThresholdWorker, IntervalWorker, IsRunning};

/// Resolved tunables the `polymarket.*` trigger settings extract/apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolymarketConfig {
    pub scan_interval_seconds: u64,
    pub review_threshold: usize,
    pub max_cache: usize,
    pub batch_size: usize,
    pub max_trades_per_day: u32,
    pub min_confidence: f64,
}

impl Default for PolymarketConfig {
    fn default() -> Self {
        Self {
            scan_interval_seconds: 300,
            review_threshold: 5,
            max_cache: 200,
            batch_size: 10,
            max_trades_per_day: 20,
            min_confidence: 0.6,
        }
    }
}

/// Registers the `polymarket.interval`, `polymarket.market`,
/// `polymarket.signal`, and `polymarket.hybrid` settings surfaces against
/// a shared registry.
pub fn register_polymarket_settings(registry: &TriggerSettingsRegistry) -> Result<(), crate::error::RegistrationError> {
    use crate::trigger::settings::{validate_bounded_f64, validate_bounded_u64, TriggerSettingsSpec};

    registry.register(TriggerSettingsSpec {
        key: "polymarket.interval".into(),
        schema: json!({
            "type": "object",
            "properties": { "scan_interval_seconds": { "type": "integer", "minimum": 30, "maximum": 86400 } }
        }),
        extract: Arc::new(|config| json!({ "scan_interval_seconds": config.get("scan_interval_seconds").cloned().unwrap_or(json!(300)) })),
        apply: Arc::new(|config, payload| {
            let seconds = payload.get("scan_interval_seconds").and_then(Value::as_u64).ok_or_else(|| crate::error::SettingsError::WrongType {
                field: "scan_interval_seconds".into(),
                message: "expected integer".into(),
            })?;
            let seconds = validate_bounded_u64("scan_interval_seconds", seconds, 30, 86_400)?;
            config["scan_interval_seconds"] = json!(seconds);
            Ok(json!({ "scan_interval_seconds": seconds }))
        }),
    })?;

    registry.register(TriggerSettingsSpec {
        key: "polymarket.market".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "review_threshold": { "type": "integer", "minimum": 1, "maximum": 1000 },
                "max_cache": { "type": "integer", "minimum": 1, "maximum": 10000 },
            }
        }),
        extract: Arc::new(|config| {
            json!({
                "review_threshold": config.get("review_threshold").cloned().unwrap_or(json!(5)),
                "max_cache": config.get("max_cache").cloned().unwrap_or(json!(200)),
            })
        }),
        apply: Arc::new(|config, payload| {
            let review_threshold =
                payload.get("review_threshold").and_then(Value::as_u64).ok_or_else(|| crate::error::SettingsError::WrongType {
                    field: "review_threshold".into(),
                    message: "expected integer".into(),
                })?;
            let max_cache = payload.get("max_cache").and_then(Value::as_u64).ok_or_else(|| crate::error::SettingsError::WrongType {
                field: "max_cache".into(),
                message: "expected integer".into(),
            })?;
            let review_threshold = validate_bounded_u64("review_threshold", review_threshold, 1, 1000)?;
            let max_cache = validate_bounded_u64("max_cache", max_cache, 1, 10_000)?;
            config["review_threshold"] = json!(review_threshold);
            config["max_cache"] = json!(max_cache);
            Ok(json!({ "review_threshold": review_threshold, "max_cache": max_cache }))
        }),
    })?;

    registry.register(TriggerSettingsSpec {
        key: "polymarket.signal".into(),
        schema: json!({
            "type": "object",
            "properties": { "min_confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 } }
        }),
        extract: Arc::new(|config| json!({ "min_confidence": config.get("min_confidence").cloned().unwrap_or(json!(0.6)) })),
        apply: Arc::new(|config, payload| {
            let min_confidence =
                payload.get("min_confidence").and_then(Value::as_f64).ok_or_else(|| crate::error::SettingsError::WrongType {
                    field: "min_confidence".into(),
                    message: "expected number".into(),
                })?;
            let min_confidence = validate_bounded_f64("min_confidence", min_confidence, 0.0, 1.0)?;
            config["min_confidence"] = json!(min_confidence);
            Ok(json!({ "min_confidence": min_confidence }))
        }),
    })?;

    registry.register(TriggerSettingsSpec {
        key: "polymarket.hybrid".into(),
        schema: json!({
            "type": "object",
            "properties": { "batch_size": { "type": "integer", "minimum": 1, "maximum": 1000 } }
        }),
        extract: Arc::new(|config| json!({ "batch_size": config.get("batch_size").cloned().unwrap_or(json!(10)) })),
        apply: Arc::new(|config, payload| {
            let batch_size = payload.get("batch_size").and_then(Value::as_u64).ok_or_else(|| crate::error::SettingsError::WrongType {
                field: "batch_size".into(),
                message: "expected integer".into(),
            })?;
            let batch_size = validate_bounded_u64("batch_size", batch_size, 1, 1000)?;
            config["batch_size"] = json!(batch_size);
            Ok(json!({ "batch_size": batch_size }))
        }),
    })?;

    Ok(())
}

/// Builds a market-fetch -> analysis -> decision tree. Empty `markets`
/// short-circuits to `{status: skipped, reason: no_markets}`. When the
/// daily trade limit is exhausted and the trigger is not manual, the
/// decision subtask is still built and run, but with execution disabled.
struct BatchOrchestrationTask {
    workforce: Arc<dyn Workforce>,
}

#[async_trait]
impl Task for BatchOrchestrationTask {
    fn task_id(&self) -> &str {
        "batch_orchestration"
    }
    fn pipeline(&self) -> &str {
        "polymarket"
    }
    fn system_name(&self) -> &str {
        "polymarket"
    }
    fn trigger_types(&self) -> &HashSet<String> {
        static TYPES: once_cell::sync::Lazy<HashSet<String>> = once_cell::sync::Lazy::new(|| {
            ["interval", "manual", "signal", "market", "hybrid"].into_iter().map(String::from).collect()
        });
        &TYPES
    }
    fn scheduler_type(&self) -> SchedulerType {
        SchedulerType::Interval
    }
    fn dependencies(&self) -> &[String] {
        &[]
    }
    fn description(&self) -> &str {
        "Fetches, analyses, and conditionally trades a batch of markets."
    }

    async fn execute(&self, context: &mut Context<Value>) -> Result<Value, TaskError> {
        let markets = context.get("markets").cloned().unwrap_or(Value::Array(vec![]));
        let markets = markets.as_array().cloned().unwrap_or_default();
        if markets.is_empty() {
            return Ok(skipped_doc("no_markets"));
        }

        let execution_enabled = context.get("execution_enabled").and_then(Value::as_bool).unwrap_or(true);
        let min_confidence = context.get("min_confidence").and_then(Value::as_f64).unwrap_or(0.6);
        let limit_note = format!("signals below {:.2} confidence are not eligible for execution", min_confidence);

        let fetch_doc = self
            .workforce
            .dispatch(
                "market_fetch",
                json!({ "content": "Market Fetch", "type": "market_fetch", "markets": markets }),
            )
            .await
            .map_err(|e| TaskError::Collaborator(e.to_string()))?;

        let analysis_doc = self
            .workforce
            .dispatch(
                "market_analysis",
                json!({ "content": "Market Analysis", "type": "market_analysis", "dependencies": ["market_fetch"] }),
            )
            .await
            .map_err(|e| TaskError::Collaborator(e.to_string()))?;

        let decision_doc = self
            .workforce
            .dispatch(
                "market_decision",
                json!({
                    "content": "Market Decision",
                    "type": "market_decision",
                    "dependencies": ["market_fetch", "market_analysis"],
                    "execution_enabled": execution_enabled,
                    "min_confidence": min_confidence,
                    "limit_note": limit_note,
                }),
            )
            .await
            .map_err(|e| TaskError::Collaborator(e.to_string()))?;

        Ok(json!({
            "market_fetch": fetch_doc,
            "market_analysis": analysis_doc,
            "market_decision": decision_doc,
            "execution_enabled": execution_enabled,
            "min_confidence": min_confidence,
            "markets_scanned": markets.len(),
        }))
    }
}

pub struct PolymarketCollaborators {
    pub workforce: Arc<dyn Workforce>,
    /// Fetches the current market batch, e.g. from an external API.
    pub fetch_markets: Box<dyn Fn() -> futures::future::BoxFuture<'static, Vec<Value>> + Send + Sync>,
}

struct DailyTradeCounter {
    day: RwLock<DateTime<Utc>>,
    count: RwLock<u32>,
}

impl DailyTradeCounter {
    fn new() -> Self {
        Self { day: RwLock::new(Utc::now()), count: RwLock::new(0) }
    }

    /// Rolls the counter over if UTC midnight has passed since the last
    /// observation, returning the (possibly reset) current count.
    fn roll_and_get(&self) -> u32 {
        let now = Utc::now();
        let mut day = self.day.write();
        if now.date_naive() != day.date_naive() {
            *day = now;
            *self.count.write() = 0;
        }
        *self.count.read()
    }

    fn record_trades(&self, n: u32) {
        *self.count.write() += n;
    }
}

pub struct PolymarketManager {
    hub: Arc<TaskFlowHub>,
    triggers: Arc<TriggerFlowRegistry>,
    feed_cache: Arc<FeedCacheThresholdWorker>,
    event_logger: Arc<EventLogger>,
    settings: Arc<TriggerSettingsRegistry>,
    config_store: ConfigStore,
    config: RwLock<PolymarketConfig>,
    fetch_markets: Arc<dyn Fn() -> futures::future::BoxFuture<'static, Vec<Value>> + Send + Sync>,

    scan_lock: Arc<AsyncMutex<()>>,
    last_interval_scan: RwLock<Option<DateTime<Utc>>>,
    daily_trades: DailyTradeCounter,

    scan_running: IsRunning,
    scan_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PolymarketManager {
    pub fn new(
        settings: Arc<TriggerSettingsRegistry>,
        config_store: ConfigStore,
        config: PolymarketConfig,
        event_logger: Arc<EventLogger>,
        collaborators: PolymarketCollaborators,
    ) -> Arc<Self> {
        let feed_cache = Arc::new(FeedCacheThresholdWorker::new(
            config.max_cache,
            config.review_threshold,
            Arc::new(|item: &Value| item.get("id").and_then(Value::as_str).unwrap_or_default().to_string()),
            Arc::new(|item: &Value, existing: Option<&FeedCacheEntry>, now: DateTime<Utc>| FeedCacheEntry {
                id: item.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                first_seen: existing.map(|e| e.first_seen).unwrap_or(now),
                last_seen: now,
                exhausted: existing.map(|e| e.exhausted).unwrap_or(false),
                data: item.clone(),
            }),
            crate::worker::feed_threshold::default_is_active(),
        ));

        let manager = Arc::new(Self {
            hub: Arc::new(TaskFlowHub::new()),
            triggers: Arc::new(TriggerFlowRegistry::new()),
            feed_cache,
            event_logger,
            settings,
            config_store,
            config: RwLock::new(config),
            fetch_markets: Arc::from(collaborators.fetch_markets),
            scan_lock: Arc::new(AsyncMutex::new(())),
            last_interval_scan: RwLock::new(None),
            daily_trades: DailyTradeCounter::new(),
            scan_running: new_running_flag(false),
            scan_handle: Mutex::new(None),
        });

        manager
            .hub
            .register(Arc::new(BatchOrchestrationTask { workforce: collaborators.workforce }))
            .expect("batch_orchestration has no dependency conflicts");
        manager.register_triggers();
        manager
    }

    /// Idempotent. Spawns the interval-triggered scan loop if not already
    /// running.
    pub async fn start(self: &Arc<Self>) {
        if self.scan_handle.lock().is_some() {
            return;
        }
        self.scan_running.store(true, std::sync::atomic::Ordering::Relaxed);
        let scan_interval = self.config.read().scan_interval_seconds;
        let mgr = self.clone();
        let worker = Arc::new(IntervalWorker::new(
            "polymarket_scan",
            scan_interval,
            30,
            Arc::new(move || {
                let mgr = mgr.clone();
                Box::pin(async move {
                    let _ = mgr.triggers.run("market_batch", json!({ "trigger_type": "interval" })).await;
                    Ok(())
                })
            }),
        ));
        *self.scan_handle.lock() = Some(worker.run_loop(self.scan_running.clone()));
        self.event_logger.info("polymarket scan loop started", json!({}));
    }

    pub async fn stop(&self) {
        self.scan_running.store(false, std::sync::atomic::Ordering::Relaxed);
        if let Some(handle) = self.scan_handle.lock().take() {
            handle.abort();
            let _ = handle.await;
        }
        self.event_logger.info("polymarket manager stopped", json!({}));
    }

    /// Validates and applies a settings payload for one of the registered
    /// `polymarket.*` keys, persisting the result via the config store.
    pub async fn update_config(&self, key: &str, payload: Value) -> Result<Value, crate::error::SettingsError> {
        let mut config = self.config_store.load(crate::config::ManagerConfig::with_defaults(json!({}), json!({}))).await;
        let normalized = self.settings.update_settings(key, &mut config.process, payload).map_err(|e| match e {
            crate::trigger::settings::UpdateSettingsError::Invalid(e) => e,
            crate::trigger::settings::UpdateSettingsError::Unknown(key) => crate::error::SettingsError::UnknownField(key),
        })?;
        config.last_updated = chrono::Utc::now();
        let _ = self.config_store.save(&config).await;

        {
            let mut cfg = self.config.write();
            if let Some(seconds) = normalized.get("scan_interval_seconds").and_then(Value::as_u64) {
                cfg.scan_interval_seconds = seconds;
            }
            if let Some(threshold) = normalized.get("review_threshold").and_then(Value::as_u64) {
                cfg.review_threshold = threshold as usize;
            }
            if let Some(max_cache) = normalized.get("max_cache").and_then(Value::as_u64) {
                cfg.max_cache = max_cache as usize;
            }
            if let Some(min_confidence) = normalized.get("min_confidence").and_then(Value::as_f64) {
                cfg.min_confidence = min_confidence;
            }
            if let Some(batch_size) = normalized.get("batch_size").and_then(Value::as_u64) {
                cfg.batch_size = batch_size as usize;
            }
        }
        Ok(normalized)
    }

    fn register_triggers(self: &Arc<Self>) {
        let mgr = self.clone();
        self.triggers.register_many(vec![TriggerFlowSpec {
            trigger_id: "market_batch".into(),
            pipeline: "polymarket".into(),
            system_name: "polymarket".into(),
            scheduler_type: SchedulerType::Interval,
            description: "Scans, caches, and conditionally trades a batch of markets.".into(),
            input_schema: None,
            resolver: Arc::new(move |kwargs| {
                let mgr = mgr.clone();
                Box::pin(async move { mgr.resolve_market_batch(kwargs).await })
            }),
        }]);
    }

    async fn resolve_market_batch(&self, kwargs: Value) -> Result<Value, TriggerError> {
        let trigger_type = kwargs.get("trigger_type").and_then(Value::as_str).unwrap_or("interval").to_string();
        let is_manual = trigger_type == "manual";

        let guard = match self.scan_lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                self.event_logger.warn("scan already in progress", json!({ "trigger_type": trigger_type }));
                return Ok(json!({ "status": "in_progress", "reason": "scan_in_progress" }));
            }
        };

        if trigger_type == "interval" {
            let scan_interval = self.config.read().scan_interval_seconds as i64;
            let mut last_scan = self.last_interval_scan.write();
            if let Some(last) = *last_scan {
                let elapsed = (Utc::now() - last).num_seconds();
                if elapsed < scan_interval {
                    self.event_logger.info("interval throttled", json!({ "elapsed": elapsed, "scan_interval": scan_interval }));
                    return Ok(json!({ "status": "skipped", "reason": "interval_throttle" }));
                }
            }
            *last_scan = Some(Utc::now());
        }

        let trades_today = self.daily_trades.roll_and_get();
        let (max_trades, min_confidence) = {
            let cfg = self.config.read();
            (cfg.max_trades_per_day, cfg.min_confidence)
        };
        let execution_enabled = is_manual || trades_today < max_trades;

        let markets = (self.fetch_markets)().await;
        if markets.is_empty() {
            drop(guard);
            return Ok(json!({ "status": "completed", "markets_found": 0 }));
        }

        let candidates = if is_manual {
            markets.clone()
        } else {
            self.feed_cache.update(&markets);
            if !self.feed_cache.ready() {
                drop(guard);
                self.event_logger.info(
                    "below review threshold",
                    json!({ "cached": self.feed_cache.len(), "markets_scanned": markets.len() }),
                );
                return Ok(json!({
                    "status": "skipped",
                    "reason": "below_review_threshold",
                    "markets_scanned": markets.len(),
                }));
            }
            self.feed_cache.pending_items().into_iter().map(|e| e.data).collect::<Vec<_>>()
        };

        let context = Context::from_json_map(json!({
            "markets": candidates,
            "execution_enabled": execution_enabled,
            "min_confidence": min_confidence,
        }));

        let flags = std::collections::HashMap::new();
        let results = self.hub.run(&trigger_type, context, &flags, Some(vec!["batch_orchestration".to_string()])).await;
        let doc = results.get("batch_orchestration").cloned().unwrap_or_else(|| skipped_doc("missing_batch_orchestration"));

        let new_positions = doc.get("market_decision").and_then(|d| d.get("new_positions")).and_then(Value::as_u64).unwrap_or(0) as u32;
        if new_positions > 0 {
            self.daily_trades.record_trades(new_positions);
        }

        if !is_manual {
            let ids: Vec<String> = candidates
                .iter()
                .filter_map(|m| m.get("id").and_then(Value::as_str).map(String::from))
                .collect();
            self.feed_cache.mark_processed(&ids);
        }

        drop(guard);

        self.event_logger.info(
            "batch scan completed",
            json!({ "markets_scanned": markets.len(), "trades_executed": new_positions }),
        );

        Ok(json!({
            "status": crate::task::doc_status(&doc).unwrap_or("completed"),
            "markets_scanned": markets.len(),
            "opportunities_filtered": candidates.len(),
            "trades_executed": new_positions,
            "new_positions": new_positions,
            "positions_active": self.feed_cache.len(),
            "pending_review": !self.feed_cache.is_empty(),
            "execution_enabled": execution_enabled,
        }))
    }

    pub fn hub(&self) -> &Arc<TaskFlowHub> {
        &self.hub
    }

    pub fn triggers(&self) -> &Arc<TriggerFlowRegistry> {
        &self.triggers
    }

    pub fn feed_cache(&self) -> &Arc<FeedCacheThresholdWorker> {
        &self.feed_cache
    }
}
