//! The wire-client boundary.
//!
//! The engine never speaks a wire protocol itself; it consumes a
//! [`NodeRpc`] implementation supplied by the embedding application. One
//! `NodeRpc` instance wraps one persistent connection; replacement (the
//! collectors' periodic reconnect, probe connections) goes through the
//! [`RpcConnector`] factory so connection latency is observable at the call
//! site.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors crossing the wire-client boundary.
///
/// Inside the engine these never propagate past the component that saw
/// them: probes convert them to a node status, collectors log and skip the
/// field.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RpcError {
    /// Call exceeded its deadline.
    #[error("request timeout")]
    Timeout,

    /// Connection could not be established or dropped mid-call.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Node answered with something the client could not interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Node does not serve this API (e.g. no market-history plugin).
    #[error("unsupported call: {0}")]
    Unsupported(String),
}

/// Head-of-chain state reported by a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicProperties {
    pub block_number: u64,
    /// Head block unix time.
    pub blocktime: i64,
    /// Witness participation percentage.
    pub participation: f64,
}

/// Identifier data for one asset, resolved at bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSymbol {
    pub id: String,
    pub precision: u32,
    /// Market fee schedule, opaque to the engine.
    pub fees: Value,
}

/// The account's recent operations, split the way the store tracks them.
#[derive(Debug, Clone)]
pub struct AccountOperations {
    /// Cancel operations; these carry no pair data and live on the account
    /// row.
    pub cancels: Value,
    /// Remaining operations keyed by trading pair.
    pub by_pair: HashMap<String, Value>,
}

/// One persistent connection to one (or a ranked list of) public API nodes.
///
/// Every method returns structured JSON-compatible data. Implementations
/// are queried concurrently from many tasks and must be cancel-safe: the
/// engine aborts in-flight calls when killing a worker.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    async fn chain_id(&self) -> Result<String, RpcError>;

    async fn dynamic_properties(&self) -> Result<DynamicProperties, RpcError>;

    /// Looks up the configured account; the result must carry its id.
    async fn account_by_name(&self) -> Result<Value, RpcError>;

    /// Balances for the configured account, keyed by asset symbol.
    async fn account_balances(&self) -> Result<HashMap<String, Value>, RpcError>;

    /// Identifier data for every tracked asset, keyed by symbol.
    async fn lookup_asset_symbols(&self) -> Result<HashMap<String, AssetSymbol>, RpcError>;

    /// Current supply per tracked asset.
    async fn current_supply(&self) -> Result<HashMap<String, Value>, RpcError>;

    /// The account's fee schedule.
    async fn fees_account(&self) -> Result<Value, RpcError>;

    async fn is_lifetime_member(&self) -> Result<bool, RpcError>;

    /// Latest trade price for a pair.
    async fn last(&self, pair: &str) -> Result<f64, RpcError>;

    /// Order book snapshot for a pair.
    async fn book(&self, pair: &str) -> Result<Value, RpcError>;

    /// Bucketed market history for a pair.
    async fn market_history(&self, pair: &str, depth: usize) -> Result<Value, RpcError>;

    /// The account's fills in a pair.
    async fn fill_order_history(&self, pair: &str) -> Result<Value, RpcError>;

    /// Open orders for the configured account, keyed by pair.
    async fn open_orders(&self) -> Result<HashMap<String, Value>, RpcError>;

    /// Relative account operation history.
    async fn operations(&self) -> Result<AccountOperations, RpcError>;

    async fn block_number(&self) -> Result<u64, RpcError>;

    async fn blocktime(&self) -> Result<i64, RpcError>;

    /// Broadcasts a signed transaction; consumed by the external signing
    /// pipeline, not by the engine itself.
    async fn broadcast_transaction(&self, tx: Value) -> Result<Value, RpcError>;
}

/// Factory producing fresh connections.
#[async_trait]
pub trait RpcConnector: Send + Sync {
    /// Connects to the first reachable node in the ranked list.
    async fn connect(&self, nodes: &[String]) -> Result<Box<dyn NodeRpc>, RpcError>;
}
