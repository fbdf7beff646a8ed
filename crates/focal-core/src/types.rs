//! Core type definitions shared across the engine.
//!
//! # Type Categories
//!
//! - [`Sample`]: one raw observation from one node, compared structurally.
//! - [`NodeStatus`]: the latency classifier's status taxonomy with wire codes.
//! - [`Tracker`] / [`Table`]: the closed set of tracked fields and the tables
//!   they live in. The enum is the single source of truth for column and
//!   table names, so no dynamic identifier ever reaches a SQL string.

use crate::utils::json_canonical;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One raw observation collected from a node, not yet reduced.
///
/// Consensus equality is structural: two samples agree when their canonical
/// serializations match, regardless of object key order at the wire level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sample(Value);

impl Sample {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Canonical serialized form; the basis of consensus grouping.
    #[must_use]
    pub fn canonical(&self) -> String {
        json_canonical::canonical_string(&self.0)
    }

    /// Grouping hash over the canonical form.
    #[must_use]
    pub fn canonical_hash(&self) -> u64 {
        json_canonical::hash_value(&self.0)
    }

    /// Whether the sample is an empty container or null.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl PartialEq for Sample {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for Sample {}

impl From<Value> for Sample {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Connectivity classification for one configured node.
///
/// The wire codes are persisted in the `nodes` table; whitelist membership
/// requires [`NodeStatus::Connected`]. Missing trade-history support is a
/// separate per-node flag, not a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Seed state at store initialization, before any probe completes.
    Initializing,
    /// Node passed every check and is eligible for the whitelist.
    Connected,
    /// Node reports a different chain id than configured.
    WrongChainId,
    /// Witness participation below 90%; the node is on a minority fork.
    Forked,
    /// Head block older than ping latency plus ten seconds.
    StaleBlocktime,
    /// Connection handshake exceeded ten seconds.
    SlowHandshake,
    /// Round-trip latency above the configured maximum.
    SlowPing,
    /// Probe raised a transport or protocol error.
    ConnectionFailed,
    /// Probe did not complete before the probe deadline.
    ConnectionTimeout,
}

/// Chain lag beyond `ping + STALE_LAG_SECS` marks a node stale.
pub const STALE_LAG_SECS: f64 = 10.0;

/// Handshakes slower than this are classified `SlowHandshake`.
pub const SLOW_HANDSHAKE_SECS: f64 = 10.0;

/// Minimum witness participation below which a node counts as forked.
pub const MIN_PARTICIPATION: f64 = 90.0;

/// Sentinel latency stored for nodes that are not `Connected`.
pub const LATENCY_SENTINEL: f64 = 9999.0;

impl NodeStatus {
    /// Numeric wire code persisted in the `nodes.code` column.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Connected => 200,
            Self::Initializing => 1000,
            Self::WrongChainId => 1002,
            Self::Forked => 1003,
            Self::StaleBlocktime => 1004,
            Self::SlowHandshake => 1005,
            Self::SlowPing => 1006,
            Self::ConnectionFailed => 1007,
            Self::ConnectionTimeout => 1008,
        }
    }

    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            200 => Some(Self::Connected),
            1000 => Some(Self::Initializing),
            1002 => Some(Self::WrongChainId),
            1003 => Some(Self::Forked),
            1004 => Some(Self::StaleBlocktime),
            1005 => Some(Self::SlowHandshake),
            1006 => Some(Self::SlowPing),
            1007 => Some(Self::ConnectionFailed),
            1008 => Some(Self::ConnectionTimeout),
            _ => None,
        }
    }

    /// Static label persisted in the `nodes.status` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "CONNECTED",
            Self::Initializing => "INITIALIZING",
            Self::WrongChainId => "WRONG CHAIN ID",
            Self::Forked => "FORKED",
            Self::StaleBlocktime => "STALE BLOCKTIME",
            Self::SlowHandshake => "SLOW HANDSHAKE",
            Self::SlowPing => "SLOW PING",
            Self::ConnectionFailed => "CONNECTION FAILED",
            Self::ConnectionTimeout => "CONNECTION TIMEOUT",
        }
    }
}

/// Everything a completed probe measured about one node.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub chain_id: String,
    /// Round-trip latency of the chain-id call, seconds.
    pub ping: f64,
    /// Connection establishment latency, seconds.
    pub handshake: f64,
    /// Head block unix time reported by the node.
    pub blocktime: i64,
    /// Witness participation percentage.
    pub participation: f64,
    /// Whether the node answered a market-history call.
    pub has_history: bool,
}

impl ProbeOutcome {
    /// Classifies a completed probe against the configured chain.
    ///
    /// Checks apply in strict priority order; the first failing check wins,
    /// so a node on the wrong chain is `WrongChainId` even when it is also
    /// slow. `skip_participation` disables the fork check for single-node
    /// and testnet configurations.
    #[must_use]
    pub fn classify(
        &self,
        expected_chain_id: &str,
        max_ping: f64,
        skip_participation: bool,
        now_unix: f64,
    ) -> NodeStatus {
        let block_lag = now_unix - self.blocktime as f64;
        if self.chain_id != expected_chain_id {
            NodeStatus::WrongChainId
        } else if !skip_participation && self.participation < MIN_PARTICIPATION {
            NodeStatus::Forked
        } else if block_lag > self.ping + STALE_LAG_SECS {
            NodeStatus::StaleBlocktime
        } else if self.handshake > SLOW_HANDSHAKE_SECS {
            NodeStatus::SlowHandshake
        } else if self.ping > max_ping {
            NodeStatus::SlowPing
        } else {
            NodeStatus::Connected
        }
    }
}

/// Base tables that carry tracked fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Account,
    Assets,
    Pairs,
    Timing,
}

impl Table {
    #[must_use]
    pub fn base(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Assets => "assets",
            Self::Pairs => "pairs",
            Self::Timing => "timing",
        }
    }

    #[must_use]
    pub fn maven(self) -> &'static str {
        match self {
            Self::Account => "maven_account",
            Self::Assets => "maven_assets",
            Self::Pairs => "maven_pairs",
            Self::Timing => "maven_timing",
        }
    }
}

/// One tracked field: a column in a base table, keyed by row name.
///
/// The closed enum replaces the original's hard-coded tracker-to-table map;
/// every SQL identifier for tracked state is derived from these methods, so
/// nothing caller-supplied is ever interpolated into a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tracker {
    // account table
    FeesAccount,
    Ltm,
    Cancels,
    // assets table
    Supply,
    FeesAsset,
    Balance,
    // pairs table
    Ops,
    Last,
    Book,
    History,
    Opens,
    Fills,
    // timing table
    Ping,
    Handshake,
    Blocktime,
    Server,
    Blocknum,
    Read,
}

impl Tracker {
    #[must_use]
    pub fn table(self) -> Table {
        match self {
            Self::FeesAccount | Self::Ltm | Self::Cancels => Table::Account,
            Self::Supply | Self::FeesAsset | Self::Balance => Table::Assets,
            Self::Ops | Self::Last | Self::Book | Self::History | Self::Opens | Self::Fills => {
                Table::Pairs
            }
            Self::Ping |
            Self::Handshake |
            Self::Blocktime |
            Self::Server |
            Self::Blocknum |
            Self::Read => Table::Timing,
        }
    }

    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::FeesAccount => "fees_account",
            Self::Ltm => "ltm",
            Self::Cancels => "cancels",
            Self::Supply => "supply",
            Self::FeesAsset => "fees_asset",
            Self::Balance => "balance",
            Self::Ops => "ops",
            Self::Last => "last",
            Self::Book => "book",
            Self::History => "history",
            Self::Opens => "opens",
            Self::Fills => "fills",
            Self::Ping => "ping",
            Self::Handshake => "handshake",
            Self::Blocktime => "blocktime",
            Self::Server => "server",
            Self::Blocknum => "blocknum",
            Self::Read => "read",
        }
    }

    /// Whether the tracker has a maven window backing it.
    ///
    /// `ping` and `handshake` are reduced from the nodes table and `server`
    /// is a wall-clock stamp; none of the three collects raw samples.
    #[must_use]
    pub fn has_window(self) -> bool {
        !matches!(self, Self::Ping | Self::Handshake | Self::Server)
    }

    /// Append-only log fields, reduced by deduplicating union rather than
    /// collapsed to a single winning value.
    #[must_use]
    pub fn is_log(self) -> bool {
        matches!(self, Self::Cancels | Self::Fills)
    }
}
