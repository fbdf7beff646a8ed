//! Scriptable mock wire clients.
//!
//! One [`MockNet`] models the whole fleet: every connection it hands out
//! shares its state, so tests flip switches (`set_hang`, `set_last`) and
//! observe the engine react. Counters expose how often the engine touched
//! the network, which is how liveness tests detect stalled and resumed
//! sampling.

use async_trait::async_trait;
use focal_core::{
    rpc::{AccountOperations, AssetSymbol, DynamicProperties, NodeRpc, RpcConnector, RpcError},
    utils::unix_now,
};
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

struct MockNetState {
    chain_id: String,
    account: String,
    account_id: String,
    assets: HashMap<String, AssetSymbol>,
    last: Mutex<HashMap<String, f64>>,
    /// When set, every network call (including connect) parks forever.
    hang: AtomicBool,
    connects: AtomicU64,
    last_calls: AtomicU64,
}

/// A scriptable fleet of identical mock nodes.
#[derive(Clone)]
pub struct MockNet {
    state: Arc<MockNetState>,
}

impl MockNet {
    /// A healthy fleet serving `chain_id` with CORE/BTC/USD assets.
    #[must_use]
    pub fn healthy(chain_id: &str, account: &str) -> Self {
        let assets = [
            ("CORE".to_string(), symbol("1.3.0", 5)),
            ("BTC".to_string(), symbol("1.3.9", 8)),
            ("USD".to_string(), symbol("1.3.12", 4)),
        ]
        .into();
        Self {
            state: Arc::new(MockNetState {
                chain_id: chain_id.into(),
                account: account.into(),
                account_id: "1.2.777".into(),
                assets,
                last: Mutex::new(HashMap::new()),
                hang: AtomicBool::new(false),
                connects: AtomicU64::new(0),
                last_calls: AtomicU64::new(0),
            }),
        }
    }

    /// The connector handed to the supervisor.
    #[must_use]
    pub fn connector(&self) -> Arc<dyn RpcConnector> {
        Arc::new(self.clone())
    }

    /// Scripts the fleet-wide last price for a pair.
    pub fn set_last(&self, pair: &str, price: f64) {
        self.state.last.lock().expect("mock lock").insert(pair.into(), price);
    }

    /// Parks every subsequent network call forever (or releases new calls
    /// again). Calls already parked stay parked; only a forced worker
    /// replacement recovers them.
    pub fn set_hang(&self, hang: bool) {
        self.state.hang.store(hang, Ordering::SeqCst);
    }

    /// Number of connections handed out so far.
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Number of last-price calls served so far.
    #[must_use]
    pub fn last_call_count(&self) -> u64 {
        self.state.last_calls.load(Ordering::SeqCst)
    }
}

fn symbol(id: &str, precision: u32) -> AssetSymbol {
    AssetSymbol { id: id.into(), precision, fees: json!({"maker": 0.001, "taker": 0.002}) }
}

#[async_trait]
impl RpcConnector for MockNet {
    async fn connect(&self, nodes: &[String]) -> Result<Box<dyn NodeRpc>, RpcError> {
        park_if_hung(&self.state).await;
        if nodes.is_empty() {
            return Err(RpcError::ConnectionFailed("no nodes offered".into()));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockRpc { state: Arc::clone(&self.state) }))
    }
}

async fn park_if_hung(state: &MockNetState) {
    if state.hang.load(Ordering::SeqCst) {
        std::future::pending::<()>().await;
    }
}

struct MockRpc {
    state: Arc<MockNetState>,
}

#[async_trait]
impl NodeRpc for MockRpc {
    async fn chain_id(&self) -> Result<String, RpcError> {
        park_if_hung(&self.state).await;
        Ok(self.state.chain_id.clone())
    }

    async fn dynamic_properties(&self) -> Result<DynamicProperties, RpcError> {
        park_if_hung(&self.state).await;
        Ok(DynamicProperties {
            block_number: 1_000,
            blocktime: unix_now() as i64,
            participation: 100.0,
        })
    }

    async fn account_by_name(&self) -> Result<Value, RpcError> {
        park_if_hung(&self.state).await;
        Ok(json!({"id": self.state.account_id, "name": self.state.account}))
    }

    async fn account_balances(&self) -> Result<HashMap<String, Value>, RpcError> {
        park_if_hung(&self.state).await;
        Ok(self
            .state
            .assets
            .keys()
            .map(|asset| (asset.clone(), json!({"free": 10.0, "tied": 0.0, "total": 10.0})))
            .collect())
    }

    async fn lookup_asset_symbols(&self) -> Result<HashMap<String, AssetSymbol>, RpcError> {
        park_if_hung(&self.state).await;
        Ok(self.state.assets.clone())
    }

    async fn current_supply(&self) -> Result<HashMap<String, Value>, RpcError> {
        park_if_hung(&self.state).await;
        Ok(self.state.assets.keys().map(|asset| (asset.clone(), json!(1_000_000.0))).collect())
    }

    async fn fees_account(&self) -> Result<Value, RpcError> {
        park_if_hung(&self.state).await;
        Ok(json!({"create": 0.01, "cancel": 0.0}))
    }

    async fn is_lifetime_member(&self) -> Result<bool, RpcError> {
        park_if_hung(&self.state).await;
        Ok(false)
    }

    async fn last(&self, pair: &str) -> Result<f64, RpcError> {
        park_if_hung(&self.state).await;
        self.state.last_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.last.lock().expect("mock lock").get(pair).copied().unwrap_or(0.0))
    }

    async fn book(&self, pair: &str) -> Result<Value, RpcError> {
        park_if_hung(&self.state).await;
        let last = self.state.last.lock().expect("mock lock").get(pair).copied().unwrap_or(0.0);
        Ok(json!({
            "bids": [[last * 0.99, 5.0]],
            "asks": [[last * 1.01, 5.0]],
        }))
    }

    async fn market_history(&self, _pair: &str, _depth: usize) -> Result<Value, RpcError> {
        park_if_hung(&self.state).await;
        Ok(json!([]))
    }

    async fn fill_order_history(&self, _pair: &str) -> Result<Value, RpcError> {
        park_if_hung(&self.state).await;
        Ok(json!([{"fill": "1.0.1", "price": 0.5}]))
    }

    async fn open_orders(&self) -> Result<HashMap<String, Value>, RpcError> {
        park_if_hung(&self.state).await;
        Ok(HashMap::new())
    }

    async fn operations(&self) -> Result<AccountOperations, RpcError> {
        park_if_hung(&self.state).await;
        Ok(AccountOperations { cancels: json!([]), by_pair: HashMap::new() })
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        park_if_hung(&self.state).await;
        Ok(1_000)
    }

    async fn blocktime(&self) -> Result<i64, RpcError> {
        park_if_hung(&self.state).await;
        Ok(unix_now() as i64)
    }

    async fn broadcast_transaction(&self, tx: Value) -> Result<Value, RpcError> {
        park_if_hung(&self.state).await;
        Ok(json!({"broadcast": tx}))
    }
}
