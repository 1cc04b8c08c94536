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

//! The DEX trading manager: an eight-stage study/decision cycle plus a
//! watchlist review path, wired through the shared task-flow, trigger-flow,
//! worker, and execution primitives.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::collaborators::{SwapClient, WalletToolkit, WatchlistToolkit, Workforce};
use crate::config::{ConfigStore, ManagerConfig};
use crate::context::Context;
use crate::error::{TaskError, TriggerError};
use crate::event::EventLogger;
use crate::execution::{ExecutionTracker, RunFn};
use crate::manager::ReviewMode;
use crate::task::{skipped_doc, SchedulerType, Task};
use crate::task_flow_hub::TaskFlowHub;
use crate::trigger::flow::{TriggerFlowRegistry, TriggerFlowSpec};
use crate::trigger::settings::TriggerSettingsRegistry;
use crate::worker::{new_running_flag, IntervalWorker, IsRunning};

/// Resolved tunables the trigger settings registry's `dex.*` specs
/// extract from / apply onto `ManagerConfig.process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexTraderConfig {
    pub cycle_hours: f64,
    pub watchlist_enabled: bool,
    pub watchlist_scan_seconds: u64,
    pub watchlist_trigger_pct: f64,
    pub watchlist_fast_trigger_pct: f64,
    pub watchlist_global_roi_trigger_enabled: bool,
    pub watchlist_global_roi_trigger_pct: f64,
    pub watchlist_global_roi_fast_trigger_pct: f64,
    pub token_exploration_limit: u32,
    pub wallet_review_cache_seconds: u64,
    pub strategy_hint_interval_hours: f64,
    pub auto_enhancement_enabled: bool,
}

impl Default for DexTraderConfig {
    fn default() -> Self {
        Self {
            cycle_hours: 4.0,
            watchlist_enabled: true,
            watchlist_scan_seconds: 60,
            watchlist_trigger_pct: 0.05,
            watchlist_fast_trigger_pct: 0.10,
            watchlist_global_roi_trigger_enabled: true,
            watchlist_global_roi_trigger_pct: 0.08,
            watchlist_global_roi_fast_trigger_pct: 0.15,
            token_exploration_limit: 25,
            wallet_review_cache_seconds: 300,
            strategy_hint_interval_hours: 12.0,
            auto_enhancement_enabled: true,
        }
    }
}

const MIN_CYCLE_INTERVAL_SECONDS: u64 = 60;

/// Registers the DEX trigger settings surfaces (`dex.cycle_interval`,
/// `dex.watchlist`, `dex.strategy_feedback`) against a shared registry.
/// Called once at boot by the service layer, before any `DexManager` is
/// constructed — see the initialisation order in the design notes.
pub fn register_dex_settings(registry: &TriggerSettingsRegistry) -> Result<(), crate::error::RegistrationError> {
    use crate::trigger::settings::{validate_bounded_f64, TriggerSettingsSpec};

    registry.register(TriggerSettingsSpec {
        key: "dex.cycle_interval".into(),
        schema: json!({
            "type": "object",
            "properties": { "cycle_hours": { "type": "number", "minimum": 1, "maximum": 168 } }
        }),
        extract: Arc::new(|config| json!({ "cycle_hours": config.get("cycle_hours").cloned().unwrap_or(json!(4.0)) })),
        apply: Arc::new(|config, payload| {
            let hours = payload.get("cycle_hours").and_then(Value::as_f64).ok_or_else(|| crate::error::SettingsError::WrongType {
                field: "cycle_hours".into(),
                message: "expected number".into(),
            })?;
            let hours = validate_bounded_f64("cycle_hours", hours, 1.0, 168.0)?;
            config["cycle_hours"] = json!(hours);
            Ok(json!({ "cycle_hours": hours }))
        }),
    })?;

    registry.register(TriggerSettingsSpec {
        key: "dex.watchlist".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "trigger_pct": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                "fast_trigger_pct": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
            }
        }),
        extract: Arc::new(|config| {
            json!({
                "trigger_pct": config.get("watchlist_trigger_pct").cloned().unwrap_or(json!(0.05)),
                "fast_trigger_pct": config.get("watchlist_fast_trigger_pct").cloned().unwrap_or(json!(0.10)),
            })
        }),
        apply: Arc::new(|config, payload| {
            let trigger_pct = payload.get("trigger_pct").and_then(Value::as_f64).ok_or_else(|| crate::error::SettingsError::WrongType {
                field: "trigger_pct".into(),
                message: "expected number".into(),
            })?;
            let fast_trigger_pct =
                payload.get("fast_trigger_pct").and_then(Value::as_f64).ok_or_else(|| crate::error::SettingsError::WrongType {
                    field: "fast_trigger_pct".into(),
                    message: "expected number".into(),
                })?;
            let trigger_pct = validate_bounded_f64("trigger_pct", trigger_pct, 0.0, 1.0)?;
            let fast_trigger_pct = validate_bounded_f64("fast_trigger_pct", fast_trigger_pct, 0.0, 1.0)?;
            config["watchlist_trigger_pct"] = json!(trigger_pct);
            config["watchlist_fast_trigger_pct"] = json!(fast_trigger_pct);
            Ok(json!({ "trigger_pct": trigger_pct, "fast_trigger_pct": fast_trigger_pct }))
        }),
    })?;

    registry.register(TriggerSettingsSpec {
        key: "dex.strategy_feedback".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "strategy_hint_interval_hours": { "type": "number", "minimum": 1, "maximum": 168 },
                "auto_enhancement_enabled": { "type": "boolean" },
            }
        }),
        extract: Arc::new(|config| {
            json!({
                "strategy_hint_interval_hours": config.get("strategy_hint_interval_hours").cloned().unwrap_or(json!(12.0)),
                "auto_enhancement_enabled": config.get("auto_enhancement_enabled").cloned().unwrap_or(json!(true)),
            })
        }),
        apply: Arc::new(|config, payload| {
            let interval_hours =
                payload.get("strategy_hint_interval_hours").and_then(Value::as_f64).ok_or_else(|| crate::error::SettingsError::WrongType {
                    field: "strategy_hint_interval_hours".into(),
                    message: "expected number".into(),
                })?;
            let interval_hours = validate_bounded_f64("strategy_hint_interval_hours", interval_hours, 1.0, 168.0)?;
            let enabled = payload.get("auto_enhancement_enabled").and_then(Value::as_bool).ok_or_else(|| crate::error::SettingsError::WrongType {
                field: "auto_enhancement_enabled".into(),
                message: "expected boolean".into(),
            })?;
            config["strategy_hint_interval_hours"] = json!(interval_hours);
            config["auto_enhancement_enabled"] = json!(enabled);
            Ok(json!({ "strategy_hint_interval_hours": interval_hours, "auto_enhancement_enabled": enabled }))
        }),
    })?;

    Ok(())
}

/// The eight-stage cycle's internal dependency tree. Order here is
/// already a valid topological order of the edges in the design doc.
const CYCLE_STAGES: &[(&str, &str, &[&str], Option<&str>)] = &[
    ("wallet_review", "Wallet Review", &[], Some("wallet_review")),
    ("token_exploration", "Token Exploration", &["wallet_review"], Some("token_exploration")),
    ("news_sentiment", "News Sentiment", &["token_exploration"], None),
    (
        "trend_analysis",
        "Trend Analysis",
        &["token_exploration", "news_sentiment"],
        Some("trend_analysis"),
    ),
    (
        "decision_gateway",
        "Decision Gateway",
        &["wallet_review", "token_exploration", "news_sentiment", "trend_analysis"],
        None,
    ),
    (
        "position_update_review",
        "Position Update Review",
        &["wallet_review", "decision_gateway"],
        Some("position_update"),
    ),
    (
        "auto_enhancement",
        "Auto Enhancement",
        &["decision_gateway", "position_update_review"],
        None,
    ),
    (
        "strategy_hint",
        "Strategy Hint",
        &["wallet_review", "decision_gateway", "position_update_review", "auto_enhancement"],
        Some("strategy_hint"),
    ),
];

/// Builds and submits the eight-stage study/decision tree to the
/// workforce, threading an optional `execution_id` through stage markers.
struct CyclePipelineTask {
    workforce: Arc<dyn Workforce>,
    tracker: Arc<ExecutionTracker>,
}

#[async_trait]
impl Task for CyclePipelineTask {
    fn task_id(&self) -> &str {
        "cycle_pipeline"
    }
    fn pipeline(&self) -> &str {
        "dex"
    }
    fn system_name(&self) -> &str {
        "dex"
    }
    fn trigger_types(&self) -> &HashSet<String> {
        static TYPES: once_cell::sync::Lazy<HashSet<String>> = once_cell::sync::Lazy::new(|| {
            ["scheduled_cycle", "manual_trigger", "watchlist_global_roi_trigger", "watchlist_fast_trigger"]
                .into_iter()
                .map(String::from)
                .collect()
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
        "Runs the eight-stage study/decision cycle against the workforce."
    }

    async fn execute(&self, context: &mut Context<Value>) -> Result<Value, TaskError> {
        let execution_id = context.get("execution_id").and_then(Value::as_str).map(String::from);
        let mode = context.get("mode").and_then(Value::as_str).unwrap_or("long_study").to_string();

        let mut stage_docs: HashMap<&str, Value> = HashMap::new();
        for (id, label, deps, marker) in CYCLE_STAGES {
            if let (Some(marker), Some(execution_id)) = (marker, execution_id.as_deref()) {
                self.tracker.set_stage(execution_id, *marker);
            }

            let payload = json!({
                "content": label,
                "type": id,
                "parent": "cycle_pipeline",
                "dependencies": deps,
                "additional_info": { "mode": mode },
            });
            let doc = self
                .workforce
                .dispatch(id, payload)
                .await
                .map_err(|e| TaskError::Collaborator(e.to_string()))?;
            stage_docs.insert(id, doc);
        }

        if let Some(execution_id) = execution_id.as_deref() {
            self.tracker.set_stage(execution_id, "completed");
        }

        Ok(json!({ "stages": stage_docs }))
    }
}

/// Wallet + position review, submitted as a single workforce task without
/// triggering trade execution.
struct WatchlistReviewPipelineTask {
    workforce: Arc<dyn Workforce>,
    wallet: Arc<dyn WalletToolkit>,
    watchlist: Arc<dyn WatchlistToolkit>,
}

#[async_trait]
impl Task for WatchlistReviewPipelineTask {
    fn task_id(&self) -> &str {
        "watchlist_review_pipeline"
    }
    fn pipeline(&self) -> &str {
        "dex"
    }
    fn system_name(&self) -> &str {
        "dex"
    }
    fn trigger_types(&self) -> &HashSet<String> {
        static TYPES: once_cell::sync::Lazy<HashSet<String>> =
            once_cell::sync::Lazy::new(|| ["watchlist_review_only"].into_iter().map(String::from).collect());
        &TYPES
    }
    fn scheduler_type(&self) -> SchedulerType {
        SchedulerType::Event
    }
    fn dependencies(&self) -> &[String] {
        &[]
    }
    fn description(&self) -> &str {
        "Reviews open positions and wallet feedback without executing trades."
    }

    async fn execute(&self, _context: &mut Context<Value>) -> Result<Value, TaskError> {
        let feedback = self.wallet.get_wallet_feedback().await.map_err(|e| TaskError::Collaborator(e.to_string()))?;
        let positions = self.watchlist.list_positions().await.map_err(|e| TaskError::Collaborator(e.to_string()))?;

        let payload = json!({
            "content": "Watchlist Review",
            "type": "watchlist_review",
            "additional_info": { "wallet_feedback": feedback, "positions": positions },
        });
        let doc = self
            .workforce
            .dispatch("watchlist_review", payload)
            .await
            .map_err(|e| TaskError::Collaborator(e.to_string()))?;
        Ok(doc)
    }
}

/// Everything a `DexManager` needs but does not itself implement.
pub struct DexCollaborators {
    pub trader_factory: Box<dyn Fn() -> Arc<dyn Workforce> + Send + Sync>,
    pub swap_client: Arc<dyn SwapClient>,
    pub watchlist: Arc<dyn WatchlistToolkit>,
    pub wallet: Arc<dyn WalletToolkit>,
}

pub struct DexManager {
    hub: Arc<TaskFlowHub>,
    triggers: Arc<TriggerFlowRegistry>,
    tracker: Arc<ExecutionTracker>,
    settings: Arc<TriggerSettingsRegistry>,
    config_store: ConfigStore,
    config: RwLock<DexTraderConfig>,
    flags: RwLock<HashMap<String, bool>>,
    event_logger: Arc<EventLogger>,

    trader: OnceCell<Arc<dyn Workforce>>,
    trader_factory: Box<dyn Fn() -> Arc<dyn Workforce> + Send + Sync>,
    swap_client: Arc<dyn SwapClient>,
    watchlist: Arc<dyn WatchlistToolkit>,
    wallet: Arc<dyn WalletToolkit>,

    cycle_running: IsRunning,
    watchlist_running: IsRunning,
    cycle_handle: Mutex<Option<JoinHandle<()>>>,
    watchlist_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DexManager {
    pub fn new(
        settings: Arc<TriggerSettingsRegistry>,
        config_store: ConfigStore,
        event_logger: Arc<EventLogger>,
        collaborators: DexCollaborators,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            hub: Arc::new(TaskFlowHub::new()),
            triggers: Arc::new(TriggerFlowRegistry::new()),
            tracker: Arc::new(ExecutionTracker::new()),
            settings,
            config_store,
            config: RwLock::new(DexTraderConfig::default()),
            flags: RwLock::new(HashMap::new()),
            event_logger,
            trader: OnceCell::new(),
            trader_factory: collaborators.trader_factory,
            swap_client: collaborators.swap_client,
            watchlist: collaborators.watchlist,
            wallet: collaborators.wallet,
            cycle_running: new_running_flag(false),
            watchlist_running: new_running_flag(false),
            cycle_handle: Mutex::new(None),
            watchlist_handle: Mutex::new(None),
        });
        manager.register_tasks();
        manager.register_triggers();
        manager
    }

    fn register_tasks(self: &Arc<Self>) {
        self.hub
            .register(Arc::new(CyclePipelineTask {
                workforce: Arc::new(LazyWorkforce { manager: self.clone() }),
                tracker: self.tracker.clone(),
            }))
            .expect("cycle_pipeline has no dependency conflicts");
        self.hub
            .register(Arc::new(WatchlistReviewPipelineTask {
                workforce: Arc::new(LazyWorkforce { manager: self.clone() }),
                wallet: self.wallet.clone(),
                watchlist: self.watchlist.clone(),
            }))
            .expect("watchlist_review_pipeline has no dependency conflicts");
    }

    fn register_triggers(self: &Arc<Self>) {
        let cycle_mgr = self.clone();
        let watchlist_review_mgr = self.clone();
        let watchlist_notification_mgr = self.clone();

        self.triggers.register_many(vec![
            TriggerFlowSpec {
                trigger_id: "cycle".into(),
                pipeline: "dex".into(),
                system_name: "dex".into(),
                scheduler_type: SchedulerType::Event,
                description: "Runs the cycle_pipeline task for a given reason.".into(),
                input_schema: None,
                resolver: Arc::new(move |kwargs| {
                    let mgr = cycle_mgr.clone();
                    Box::pin(async move { mgr.resolve_cycle(kwargs).await })
                }),
            },
            TriggerFlowSpec {
                trigger_id: "watchlist_review".into(),
                pipeline: "dex".into(),
                system_name: "dex".into(),
                scheduler_type: SchedulerType::Event,
                description: "Runs the watchlist-only review, or rewrites to a full cycle in fast mode.".into(),
                input_schema: None,
                resolver: Arc::new(move |kwargs| {
                    let mgr = watchlist_review_mgr.clone();
                    Box::pin(async move { mgr.resolve_watchlist_review(kwargs).await })
                }),
            },
            TriggerFlowSpec {
                trigger_id: "watchlist_notification".into(),
                pipeline: "dex".into(),
                system_name: "dex".into(),
                scheduler_type: SchedulerType::Event,
                description: "Handles a per-position or global-ROI watchlist notification.".into(),
                input_schema: None,
                resolver: Arc::new(move |kwargs| {
                    let mgr = watchlist_notification_mgr.clone();
                    Box::pin(async move { mgr.resolve_watchlist_notification(kwargs).await })
                }),
            },
        ]);
    }

    async fn resolve_cycle(&self, kwargs: Value) -> Result<Value, TriggerError> {
        let reason = kwargs.get("reason").and_then(Value::as_str).unwrap_or("manual_trigger").to_string();
        let mode = kwargs.get("mode").and_then(Value::as_str).unwrap_or("long_study").to_string();
        let execution_id = kwargs.get("execution_id").and_then(Value::as_str).map(String::from);

        let mut context = Context::from_json_map(kwargs);
        context.update("mode", json!(mode));
        if let Some(execution_id) = &execution_id {
            context.update("execution_id", json!(execution_id));
        }

        let flags = self.flags.read().clone();
        let results = self.hub.run(&reason, context, &flags, Some(vec!["cycle_pipeline".to_string()])).await;

        let doc = results.get("cycle_pipeline").cloned().unwrap_or_else(|| skipped_doc("missing_cycle_pipeline"));
        let status = crate::task::doc_status(&doc).unwrap_or("failed").to_string();
        Ok(json!({ "cycle_pipeline": { "status": status } }))
    }

    async fn resolve_watchlist_review(&self, kwargs: Value) -> Result<Value, TriggerError> {
        let mode = kwargs.get("mode").and_then(Value::as_str).unwrap_or("long_study").to_string();

        if mode == ReviewMode::FastDecision.as_str() {
            return self.triggers.run("cycle", json!({ "reason": "watchlist_fast_trigger", "mode": mode })).await.pipe_ok();
        }

        let flags = self.flags.read().clone();
        let context = Context::from_json_map(kwargs);
        let results = self
            .hub
            .run("watchlist_review_only", context, &flags, Some(vec!["watchlist_review_pipeline".to_string()]))
            .await;
        let doc = results
            .get("watchlist_review_pipeline")
            .cloned()
            .unwrap_or_else(|| skipped_doc("missing_watchlist_review_pipeline"));
        Ok(json!({ "watchlist_review_pipeline": doc }))
    }

    async fn resolve_watchlist_notification(&self, kwargs: Value) -> Result<Value, TriggerError> {
        let trigger_type = kwargs.get("trigger_type").and_then(Value::as_str).unwrap_or_default().to_string();

        if trigger_type == "global_roi" {
            let mode = kwargs.get("mode").and_then(Value::as_str).unwrap_or("long_study").to_string();
            return self
                .triggers
                .run("cycle", json!({ "reason": "watchlist_global_roi_trigger", "mode": mode }))
                .await
                .pipe_ok();
        }

        let position_id = kwargs.get("position_id").and_then(Value::as_str).unwrap_or_default().to_string();
        let positions = self
            .watchlist
            .list_positions()
            .await
            .map_err(|e| TriggerError::Collaborator(e.to_string()))?;
        let position = positions.iter().find(|p| p.get("position_id").and_then(Value::as_str) == Some(position_id.as_str()));

        let Some(position) = position else {
            return Ok(json!({ "success": false, "reason": "position_not_found", "position_id": position_id }));
        };

        let quantity = position.get("quantity").and_then(Value::as_f64).unwrap_or(0.0);
        if quantity <= 0.0 {
            return Ok(json!({ "success": false, "reason": "position_not_found", "position_id": position_id }));
        }

        self.swap_client
            .execute_watchlist_exit(&position_id, &trigger_type)
            .await
            .map_err(|e| TriggerError::Collaborator(e.to_string()))?;
        self.watchlist
            .close_position(&position_id, &trigger_type)
            .await
            .map_err(|e| TriggerError::Collaborator(e.to_string()))?;

        let entry_price = position.get("entry_price").and_then(Value::as_f64).unwrap_or(0.0);
        let current_price = kwargs.get("current_price").and_then(Value::as_f64).unwrap_or(entry_price);
        let realized_pnl = (current_price - entry_price) * quantity;

        let pct_change = kwargs.get("pct_change").and_then(Value::as_f64).unwrap_or(0.0).abs();
        let fast_threshold = self.config.read().watchlist_fast_trigger_pct;
        let mode = if pct_change >= fast_threshold { ReviewMode::FastDecision } else { ReviewMode::LongStudy };

        let follow_on = self.triggers.run("watchlist_review", json!({ "mode": mode.as_str() })).await;

        Ok(json!({
            "success": true,
            "position_id": position_id,
            "realized_pnl": realized_pnl,
            "follow_on": follow_on,
        }))
    }

    /// Lazily builds (and memoizes) the workforce client. Concurrent
    /// first-callers serialize through the `OnceCell`, so the workforce is
    /// constructed exactly once.
    async fn ensure_trader(&self) -> Arc<dyn Workforce> {
        self.trader.get_or_init(|| async { (self.trader_factory)() }).await.clone()
    }

    /// Idempotent. If both flags are false, logs a warning and does
    /// nothing.
    pub async fn start(self: &Arc<Self>, cycle_enabled: bool, watchlist_enabled: bool) {
        if !cycle_enabled && !watchlist_enabled {
            warn!("dex manager start() called with both cycle and watchlist disabled");
            self.event_logger.warn("dex start called with nothing enabled", json!({}));
            return;
        }

        if cycle_enabled && self.cycle_handle.lock().is_none() {
            self.cycle_running.store(true, std::sync::atomic::Ordering::Relaxed);
            let interval_seconds = (self.config.read().cycle_hours * 3600.0) as u64;
            let mgr = self.clone();
            let worker = Arc::new(IntervalWorker::new(
                "dex_cycle",
                interval_seconds,
                MIN_CYCLE_INTERVAL_SECONDS,
                Arc::new(move || {
                    let mgr = mgr.clone();
                    Box::pin(async move {
                        mgr.launch_execution("long_study", "scheduled_cycle");
                        Ok(())
                    })
                }),
            ));
            *self.cycle_handle.lock() = Some(worker.run_loop(self.cycle_running.clone()));
            info!("dex cycle loop started");
            self.event_logger.info("dex cycle loop started", json!({}));
        }

        if watchlist_enabled && self.watchlist_handle.lock().is_none() {
            self.watchlist_running.store(true, std::sync::atomic::Ordering::Relaxed);
            let scan_seconds = self.config.read().watchlist_scan_seconds;
            let mgr = self.clone();
            let worker = Arc::new(IntervalWorker::new(
                "dex_watchlist",
                scan_seconds,
                1,
                Arc::new(move || {
                    let mgr = mgr.clone();
                    Box::pin(async move {
                        let _ = mgr.triggers.run("watchlist_review", json!({ "mode": "long_study" })).await;
                        Ok(())
                    })
                }),
            ));
            *self.watchlist_handle.lock() = Some(worker.run_loop(self.watchlist_running.clone()));
            info!("dex watchlist loop started");
            self.event_logger.info("dex watchlist loop started", json!({}));
        }
    }

    pub async fn stop(&self) {
        self.cycle_running.store(false, std::sync::atomic::Ordering::Relaxed);
        self.watchlist_running.store(false, std::sync::atomic::Ordering::Relaxed);

        if let Some(handle) = self.cycle_handle.lock().take() {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(handle) = self.watchlist_handle.lock().take() {
            handle.abort();
            let _ = handle.await;
        }

        self.tracker.cancel_all().await;
        self.event_logger.info("dex manager stopped", json!({}));
    }

    /// Wraps `run_trader_cycle` in a closure handed to the tracker.
    pub fn launch_execution(self: &Arc<Self>, mode: &str, reason: &str) -> String {
        let mgr = self.clone();
        let mode = mode.to_string();
        let reason = reason.to_string();
        let mode_for_tracker = mode.clone();
        let reason_for_tracker = reason.clone();
        let run_fn: RunFn = Arc::new(move |execution_id| {
            let mgr = mgr.clone();
            let mode = mode.clone();
            let reason = reason.clone();
            Box::pin(async move { mgr.run_trader_cycle(&mode, &reason, Some(execution_id)).await })
        });
        self.tracker.launch(mode_for_tracker, reason_for_tracker, run_fn)
    }

    async fn run_trader_cycle(&self, mode: &str, reason: &str, execution_id: Option<String>) -> Result<Value, TaskError> {
        let mut kwargs = json!({ "reason": reason, "mode": mode });
        if let Some(execution_id) = execution_id {
            kwargs["execution_id"] = json!(execution_id);
        }
        self.triggers
            .run("cycle", kwargs)
            .await
            .pipe_ok()
            .map_err(|e: TriggerError| TaskError::Collaborator(e.to_string()))
    }

    pub fn update_task_flows(&self, overrides: HashMap<String, bool>) -> Vec<crate::task::TaskFlowSpec> {
        let mut flags = self.flags.write();
        flags.extend(overrides);
        self.hub.list(&flags)
    }

    pub async fn update_config(&self, payload: Value) -> Result<Value, crate::error::SettingsError> {
        let mut config = self.config_store.load(ManagerConfig::with_defaults(json!({}), json!({}))).await;
        let normalized = self.settings.update_settings("dex.cycle_interval", &mut config.process, payload).map_err(|e| match e {
            crate::trigger::settings::UpdateSettingsError::Invalid(e) => e,
            crate::trigger::settings::UpdateSettingsError::Unknown(key) => crate::error::SettingsError::UnknownField(key),
        })?;
        config.last_updated = chrono::Utc::now();
        let _ = self.config_store.save(&config).await;

        if let Some(hours) = normalized.get("cycle_hours").and_then(Value::as_f64) {
            self.config.write().cycle_hours = hours;
        }
        Ok(normalized)
    }

    pub fn hub(&self) -> &Arc<TaskFlowHub> {
        &self.hub
    }

    pub fn triggers(&self) -> &Arc<TriggerFlowRegistry> {
        &self.triggers
    }

    pub fn tracker(&self) -> &Arc<ExecutionTracker> {
        &self.tracker
    }
}

/// Adapts `ensure_trader`'s lazily-built workforce into the `Workforce`
/// trait object the cycle tasks expect, without forcing construction
/// until a task actually dispatches through it.
struct LazyWorkforce {
    manager: Arc<DexManager>,
}

#[async_trait]
impl Workforce for LazyWorkforce {
    async fn process_task_async(&self, task_name: &str, payload: Value) -> Option<Result<Value, TaskError>> {
        let trader = self.manager.ensure_trader().await;
        Some(trader.dispatch(task_name, payload).await)
    }
}

trait PipeOk<T> {
    fn pipe_ok(self) -> Result<T, TriggerError>;
}

impl PipeOk<Value> for Value {
    fn pipe_ok(self) -> Result<Value, TriggerError> {
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::FilesystemMirror;
    use std::collections::HashMap as Map;

    struct NullWorkforce;
    #[async_trait]
    impl Workforce for NullWorkforce {
        async fn process_task_async(&self, _task_name: &str, _payload: Value) -> Option<Result<Value, TaskError>> {
            Some(Ok(json!({"status": "completed"})))
        }
    }

    struct NullSwapClient;
    #[async_trait]
    impl SwapClient for NullSwapClient {
        async fn quote_exact_in(&self, _: &str, _: &str, _: f64) -> Result<Value, TaskError> {
            Ok(json!({}))
        }
        async fn execute_watchlist_exit(&self, _: &str, _: &str) -> Result<Value, TaskError> {
            Ok(json!({"success": true}))
        }
        async fn register_stop_loss_take_profit(&self, _: &str, _: f64, _: f64) -> Result<Value, TaskError> {
            Ok(json!({}))
        }
    }

    struct EmptyWatchlist;
    #[async_trait]
    impl WatchlistToolkit for EmptyWatchlist {
        async fn list_positions(&self) -> Result<Vec<Value>, TaskError> {
            Ok(vec![])
        }
        async fn close_position(&self, _: &str, _: &str) -> Result<Value, TaskError> {
            Ok(json!({}))
        }
        async fn evaluate_triggers(&self, _: &Value) -> Result<Value, TaskError> {
            Ok(json!({}))
        }
        async fn evaluate_global_roi_trigger(&self) -> Result<Option<Value>, TaskError> {
            Ok(None)
        }
    }

    struct EmptyWallet;
    #[async_trait]
    impl WalletToolkit for EmptyWallet {
        async fn get_wallet_feedback(&self) -> Result<Value, TaskError> {
            Ok(json!({}))
        }
        async fn get_global_wallet_state(&self) -> Result<Value, TaskError> {
            Ok(json!({}))
        }
    }

    #[derive(Default)]
    struct InMemoryKv {
        store: parking_lot::Mutex<Map<String, String>>,
    }

    #[async_trait]
    impl crate::kv::KvStore for InMemoryKv {
        async fn get(&self, key: &str) -> Result<Option<String>, crate::error::PersistenceError> {
            Ok(self.store.lock().get(key).cloned())
        }
        async fn set(&self, key: &str, value: &str) -> Result<(), crate::error::PersistenceError> {
            self.store.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }
        async fn del(&self, key: &str) -> Result<(), crate::error::PersistenceError> {
            self.store.lock().remove(key);
            Ok(())
        }
        async fn lpush(&self, _: &str, _: &str) -> Result<(), crate::error::PersistenceError> {
            Ok(())
        }
        async fn rpush(&self, _: &str, _: &str) -> Result<(), crate::error::PersistenceError> {
            Ok(())
        }
        async fn lrange(&self, _: &str, _: isize, _: isize) -> Result<Vec<String>, crate::error::PersistenceError> {
            Ok(vec![])
        }
        async fn ltrim(&self, _: &str, _: isize, _: isize) -> Result<(), crate::error::PersistenceError> {
            Ok(())
        }
        async fn hset(&self, _: &str, _: &str, _: &str) -> Result<(), crate::error::PersistenceError> {
            Ok(())
        }
        async fn hget(&self, _: &str, _: &str) -> Result<Option<String>, crate::error::PersistenceError> {
            Ok(None)
        }
        async fn hgetall(&self, _: &str) -> Result<Map<String, String>, crate::error::PersistenceError> {
            Ok(Map::new())
        }
        async fn hdel(&self, _: &str, _: &str) -> Result<(), crate::error::PersistenceError> {
            Ok(())
        }
        async fn hincrby(&self, _: &str, _: &str, delta: i64) -> Result<i64, crate::error::PersistenceError> {
            Ok(delta)
        }
        async fn expire(&self, _: &str, _: i64) -> Result<(), crate::error::PersistenceError> {
            Ok(())
        }
    }

    fn test_manager() -> Arc<DexManager> {
        let dir = tempfile::tempdir().unwrap();
        let kv: Arc<dyn crate::kv::KvStore> = Arc::new(InMemoryKv::default());
        let mirror = FilesystemMirror::new(dir.path());
        let config_store = ConfigStore::new(kv, mirror, "dex:config", "dex/config.json");
        let settings = Arc::new(TriggerSettingsRegistry::new());

        DexManager::new(
            settings,
            config_store,
            Arc::new(EventLogger::new("dex")),
            DexCollaborators {
                trader_factory: Box::new(|| Arc::new(NullWorkforce) as Arc<dyn Workforce>),
                swap_client: Arc::new(NullSwapClient),
                watchlist: Arc::new(EmptyWatchlist),
                wallet: Arc::new(EmptyWallet),
            },
        )
    }

    #[tokio::test]
    async fn manual_cycle_produces_a_running_or_completed_execution() {
        let manager = test_manager();
        let execution_id = manager.launch_execution("long_study", "manual_trigger");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let status = manager.tracker().get_status(&execution_id);
        assert!(matches!(status["status"].as_str(), Some("running") | Some("completed")));
    }

    #[tokio::test]
    async fn ensure_trader_builds_exactly_once_under_concurrency() {
        let manager = test_manager();
        let (a, b) = tokio::join!(manager.ensure_trader(), manager.ensure_trader());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn start_with_both_flags_false_is_a_no_op() {
        let manager = test_manager();
        manager.start(false, false).await;
        assert!(manager.cycle_handle.lock().is_none());
        assert!(manager.watchlist_handle.lock().is_none());
    }

    #[tokio::test]
    async fn start_then_stop_clears_handles() {
        let manager = test_manager();
        manager.start(true, false).await;
        assert!(manager.cycle_handle.lock().is_some());
        manager.stop().await;
        assert!(manager.cycle_handle.lock().is_none());
    }

    #[tokio::test]
    async fn watchlist_notification_for_unknown_position_reports_not_found() {
        let manager = test_manager();
        let doc = manager
            .triggers()
            .run(
                "watchlist_notification",
                json!({ "trigger_type": "take_profit", "position_id": "missing" }),
            )
            .await;
        assert_eq!(doc["success"], false);
        assert_eq!(doc["reason"], "position_not_found");
    }

    #[tokio::test]
    async fn global_roi_notification_redirects_to_cycle_without_swap_exit() {
        let manager = test_manager();
        let doc = manager
            .triggers()
            .run("watchlist_notification", json!({ "trigger_type": "global_roi", "mode": "fast_decision" }))
            .await;
        assert_eq!(doc["status"], "completed");
        assert_eq!(doc["cycle_pipeline"]["status"], "completed");
    }

    #[test]
    fn update_task_flows_merges_overrides() {
        let manager = test_manager();
        let mut overrides = Map::new();
        overrides.insert("cycle_pipeline".to_string(), false);
        let specs = manager.update_task_flows(overrides);
        let cycle = specs.iter().find(|s| s.task_id == "cycle_pipeline").unwrap();
        assert!(!cycle.enabled);
    }

    #[tokio::test]
    async fn update_config_validates_and_persists_cycle_hours() {
        let dir = tempfile::tempdir().unwrap();
        let kv: Arc<dyn crate::kv::KvStore> = Arc::new(InMemoryKv::default());
        let mirror = FilesystemMirror::new(dir.path());
        let config_store = ConfigStore::new(kv, mirror, "dex:config", "dex/config.json");
        let settings = Arc::new(TriggerSettingsRegistry::new());
        register_dex_settings(&settings).unwrap();

        let manager = DexManager::new(
            settings,
            config_store,
            Arc::new(EventLogger::new("dex")),
            DexCollaborators {
                trader_factory: Box::new(|| Arc::new(NullWorkforce) as Arc<dyn Workforce>),
                swap_client: Arc::new(NullSwapClient),
                watchlist: Arc::new(EmptyWatchlist),
                wallet: Arc::new(EmptyWallet),
            },
        );

        let normalized = manager.update_config(json!({ "cycle_hours": 8.0 })).await.unwrap();
        assert_eq!(normalized["cycle_hours"], 8.0);
        assert_eq!(manager.config.read().cycle_hours, 8.0);

        let err = manager.update_config(json!({ "cycle_hours": 999.0 })).await.unwrap_err();
        assert!(matches!(err, crate::error::SettingsError::OutOfRange { .. }));
    }
}
