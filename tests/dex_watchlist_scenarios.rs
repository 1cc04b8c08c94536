//! End-to-end coverage of the DEX manager's trigger-flow scenarios,
//! exercised through the public crate surface rather than its internal
//! test fixtures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use flowhub::collaborators::{SwapClient, WalletToolkit, WatchlistToolkit, Workforce};
use flowhub::config::ConfigStore;
use flowhub::error::{PersistenceError, TaskError};
use flowhub::event::EventLogger;
use flowhub::kv::{FilesystemMirror, KvStore};
use flowhub::manager::dex::DexCollaborators;
use flowhub::manager::DexManager;
use flowhub::trigger::settings::TriggerSettingsRegistry;

static INIT_TRACING: Once = Once::new();

/// Installs a visible subscriber once per test binary so a failing
/// scenario's event-logger output shows up alongside the assertion.
fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Default)]
struct InMemoryKv {
    store: Mutex<std::collections::HashMap<String, String>>,
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
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
    async fn lpush(&self, _: &str, _: &str) -> Result<(), PersistenceError> {
        Ok(())
    }
    async fn rpush(&self, _: &str, _: &str) -> Result<(), PersistenceError> {
        Ok(())
    }
    async fn lrange(&self, _: &str, _: isize, _: isize) -> Result<Vec<String>, PersistenceError> {
        Ok(vec![])
    }
    async fn ltrim(&self, _: &str, _: isize, _: isize) -> Result<(), PersistenceError> {
        Ok(())
    }
    async fn hset(&self, _: &str, _: &str, _: &str) -> Result<(), PersistenceError> {
        Ok(())
    }
    async fn hget(&self, _: &str, _: &str) -> Result<Option<String>, PersistenceError> {
        Ok(None)
    }
    async fn hgetall(&self, _: &str) -> Result<std::collections::HashMap<String, String>, PersistenceError> {
        Ok(std::collections::HashMap::new())
    }
    async fn hdel(&self, _: &str, _: &str) -> Result<(), PersistenceError> {
        Ok(())
    }
    async fn hincrby(&self, _: &str, _: &str, delta: i64) -> Result<i64, PersistenceError> {
        Ok(delta)
    }
    async fn expire(&self, _: &str, _: i64) -> Result<(), PersistenceError> {
        Ok(())
    }
}

struct NullWorkforce;
#[async_trait]
impl Workforce for NullWorkforce {
    async fn process_task_async(&self, _task_name: &str, _payload: Value) -> Option<Result<Value, TaskError>> {
        Some(Ok(json!({"status": "completed"})))
    }
}

struct NullSwapClient {
    exits: Arc<AtomicUsize>,
}
#[async_trait]
impl SwapClient for NullSwapClient {
    async fn quote_exact_in(&self, _: &str, _: &str, _: f64) -> Result<Value, TaskError> {
        Ok(json!({}))
    }
    async fn execute_watchlist_exit(&self, position_id: &str, reason: &str) -> Result<Value, TaskError> {
        self.exits.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"success": true, "position_id": position_id, "reason": reason}))
    }
    async fn register_stop_loss_take_profit(&self, _: &str, _: f64, _: f64) -> Result<Value, TaskError> {
        Ok(json!({}))
    }
}

struct OnePositionWatchlist {
    closes: Arc<AtomicUsize>,
}
#[async_trait]
impl WatchlistToolkit for OnePositionWatchlist {
    async fn list_positions(&self) -> Result<Vec<Value>, TaskError> {
        Ok(vec![json!({
            "position_id": "p1",
            "token_symbol": "ETH",
            "quantity": 1.5,
            "entry_price": 2000.0,
        })])
    }
    async fn close_position(&self, position_id: &str, reason: &str) -> Result<Value, TaskError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"position_id": position_id, "reason": reason}))
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

fn manager_with_position() -> (Arc<DexManager>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::default());
    let mirror = FilesystemMirror::new(dir.path());
    let config_store = ConfigStore::new(kv, mirror, "dex:config", "dex/config.json");
    let settings = Arc::new(TriggerSettingsRegistry::new());

    let exits = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));

    let manager = DexManager::new(
        settings,
        config_store,
        Arc::new(EventLogger::new("dex")),
        DexCollaborators {
            trader_factory: Box::new(|| Arc::new(NullWorkforce) as Arc<dyn Workforce>),
            swap_client: Arc::new(NullSwapClient { exits: exits.clone() }),
            watchlist: Arc::new(OnePositionWatchlist { closes: closes.clone() }),
            wallet: Arc::new(EmptyWallet),
        },
    );
    (manager, exits, closes)
}

/// Scenario: a take-profit notification above the fast-trigger threshold
/// exits the position exactly once, closes it, and rewrites the follow-on
/// review into a fast-decision cycle rather than a full study.
#[tokio::test]
async fn watchlist_fast_trigger_exits_and_rewrites_to_fast_cycle() {
    let (manager, exits, closes) = manager_with_position();

    let doc = manager
        .triggers()
        .run(
            "watchlist_notification",
            json!({
                "trigger_type": "take_profit",
                "pct_change": 0.12,
                "position_id": "p1",
                "token_symbol": "ETH",
                "wallet_address": "0xwallet",
                "entry_price": 2000.0,
                "current_price": 2240.0,
            }),
        )
        .await;

    assert_eq!(doc["success"], true);
    assert_eq!(exits.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(doc["follow_on"]["cycle_pipeline"]["status"], "completed");
}

/// Scenario: a manual cycle trigger produces an execution that reaches a
/// running or completed terminal state without ever touching the watchlist.
#[tokio::test]
async fn manual_cycle_reaches_a_terminal_or_running_state() {
    let (manager, exits, closes) = manager_with_position();

    let execution_id = manager.launch_execution("long_study", "manual_trigger");
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let status = manager.tracker().get_status(&execution_id);
    assert!(matches!(status["status"].as_str(), Some("running") | Some("completed")));
    assert_eq!(exits.load(Ordering::SeqCst), 0);
    assert_eq!(closes.load(Ordering::SeqCst), 0);
}

/// Scenario: a global-ROI notification redirects straight into a full
/// cycle and never calls the swap client.
#[tokio::test]
async fn global_roi_notification_skips_swap_exit() {
    let (manager, exits, _closes) = manager_with_position();

    let doc = manager
        .triggers()
        .run("watchlist_notification", json!({ "trigger_type": "global_roi", "mode": "fast_decision" }))
        .await;

    assert_eq!(doc["status"], "completed");
    assert_eq!(doc["cycle_pipeline"]["status"], "completed");
    assert_eq!(exits.load(Ordering::SeqCst), 0);
}
