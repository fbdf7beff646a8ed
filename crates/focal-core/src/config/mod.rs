//! Engine configuration with layered loading.
//!
//! One immutable [`FocalConfig`] value is built at startup and passed
//! explicitly to every component; nothing reads ambient globals. Loading
//! order (later overrides earlier): compiled defaults, TOML file, `FOCAL_*`
//! environment variables.
//!
//! ```toml
//! [chain]
//! name = "mainnet"
//! chain_id = "4018d784..."
//! account = "trader-1"
//! core = "CORE"
//! nodes = ["wss://node-a.example.com", "wss://node-b.example.com"]
//! assets = ["CORE", "BTC", "USD"]
//! pairs = ["BTC-USD"]
//!
//! [tuning]
//! collectors = 7
//! window = 7
//! ```
//!
//! Configuration is validated at load time; invalid node URLs, unknown pair
//! legs, or zero sizes return errors rather than failing later.

use crate::utils::invert_pair;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config load error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Identity of the watched chain: nodes, account, assets, and markets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain nickname; keys the store file and the run-flag entry.
    pub name: String,

    /// Expected chain id; nodes reporting anything else are rejected.
    pub chain_id: String,

    /// The single account this engine watches.
    pub account: String,

    /// Core token symbol (the chain's fee asset).
    pub core: String,

    /// Public API node URLs to sample from.
    pub nodes: Vec<String>,

    /// Asset symbols to track; must include the core token.
    pub assets: Vec<String>,

    /// Trading pairs to track, formatted `BASE-QUOTE`.
    pub pairs: Vec<String>,
}

impl ChainConfig {
    /// Markets pricing each non-core asset back to the core token.
    #[must_use]
    pub fn core_pairs(&self) -> Vec<String> {
        self.assets
            .iter()
            .filter(|asset| **asset != self.core)
            .map(|asset| format!("{asset}-{}", self.core))
            .collect()
    }

    /// Every pair row seeded in the store: configured pairs, core pairs,
    /// and the inversions of both, deduplicated and sorted.
    #[must_use]
    pub fn all_pairs(&self) -> Vec<String> {
        let mut set = BTreeSet::new();
        for pair in self.pairs.iter().cloned().chain(self.core_pairs()) {
            set.insert(invert_pair(&pair));
            set.insert(pair);
        }
        set.into_iter().collect()
    }

    /// Whether fork-participation checks should be skipped: single-node
    /// configurations and testnets have no meaningful participation signal.
    #[must_use]
    pub fn skip_participation(&self) -> bool {
        self.nodes.len() == 1 || self.name.contains("testnet")
    }
}

/// Timing and sizing knobs for the sampling machinery.
///
/// Defaults mirror production operation; tests shrink them to milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Number of collector workers in the pool.
    #[serde(default = "default_collectors")]
    pub collectors: usize,

    /// Maven window depth W; windows never exceed this many samples.
    #[serde(default = "default_window")]
    pub window: usize,

    /// Hard deadline for one latency probe; a probe still running at the
    /// deadline is killed and classified as a connection timeout.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Budget between latency cycles, divided by the node count.
    #[serde(default = "default_latency_period_ms")]
    pub latency_period_ms: u64,

    /// Join budget shared across bootstrap harvest tasks.
    #[serde(default = "default_bootstrap_join_ms")]
    pub bootstrap_join_ms: u64,

    /// Lifespan of one disposable bootstrap attempt before it is discarded.
    #[serde(default = "default_bootstrap_restart_ms")]
    pub bootstrap_restart_ms: u64,

    /// Collector iterations between RPC connection replacements.
    #[serde(default = "default_reconnect_ratio")]
    pub reconnect_ratio: u64,

    /// Collector/oracle iterations between low-frequency passes.
    #[serde(default = "default_high_low_ratio")]
    pub high_low_ratio: u64,

    /// Pause between collector field fetches.
    #[serde(default = "default_collector_pause_ms")]
    pub collector_pause_ms: u64,

    /// Pause between oracle field reductions.
    #[serde(default = "default_oracle_pause_ms")]
    pub oracle_pause_ms: u64,

    /// Maximum acceptable ping in seconds before a node is `SLOW PING`.
    #[serde(default = "default_max_ping")]
    pub max_ping: f64,

    /// Interval between forced collector regenerations.
    #[serde(default = "default_regeneration_ms")]
    pub regeneration_ms: u64,

    /// Supervisor tick: run-flag polls and regeneration countdown.
    #[serde(default = "default_supervisor_tick_ms")]
    pub supervisor_tick_ms: u64,

    /// Grace period between clearing a collector's free flag and killing it.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Cap on the store's busy-retry backoff.
    #[serde(default = "default_store_max_backoff_ms")]
    pub store_max_backoff_ms: u64,
}

fn default_collectors() -> usize {
    7
}

fn default_window() -> usize {
    7
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}

fn default_latency_period_ms() -> u64 {
    60_000
}

fn default_bootstrap_join_ms() -> u64 {
    8_000
}

fn default_bootstrap_restart_ms() -> u64 {
    10_000
}

fn default_reconnect_ratio() -> u64 {
    3
}

fn default_high_low_ratio() -> u64 {
    20
}

fn default_collector_pause_ms() -> u64 {
    100
}

fn default_oracle_pause_ms() -> u64 {
    500
}

fn default_max_ping() -> f64 {
    1.0
}

fn default_regeneration_ms() -> u64 {
    180_000
}

fn default_supervisor_tick_ms() -> u64 {
    1_000
}

fn default_kill_grace_ms() -> u64 {
    1_000
}

fn default_store_max_backoff_ms() -> u64 {
    5_000
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            collectors: default_collectors(),
            window: default_window(),
            probe_timeout_ms: default_probe_timeout_ms(),
            latency_period_ms: default_latency_period_ms(),
            bootstrap_join_ms: default_bootstrap_join_ms(),
            bootstrap_restart_ms: default_bootstrap_restart_ms(),
            reconnect_ratio: default_reconnect_ratio(),
            high_low_ratio: default_high_low_ratio(),
            collector_pause_ms: default_collector_pause_ms(),
            oracle_pause_ms: default_oracle_pause_ms(),
            max_ping: default_max_ping(),
            regeneration_ms: default_regeneration_ms(),
            supervisor_tick_ms: default_supervisor_tick_ms(),
            kill_grace_ms: default_kill_grace_ms(),
            store_max_backoff_ms: default_store_max_backoff_ms(),
        }
    }
}

impl TuningConfig {
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    #[must_use]
    pub fn bootstrap_join(&self) -> Duration {
        Duration::from_millis(self.bootstrap_join_ms)
    }

    #[must_use]
    pub fn bootstrap_restart(&self) -> Duration {
        Duration::from_millis(self.bootstrap_restart_ms)
    }

    #[must_use]
    pub fn collector_pause(&self) -> Duration {
        Duration::from_millis(self.collector_pause_ms)
    }

    #[must_use]
    pub fn oracle_pause(&self) -> Duration {
        Duration::from_millis(self.oracle_pause_ms)
    }

    #[must_use]
    pub fn supervisor_tick(&self) -> Duration {
        Duration::from_millis(self.supervisor_tick_ms)
    }

    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    #[must_use]
    pub fn store_max_backoff(&self) -> Duration {
        Duration::from_millis(self.store_max_backoff_ms)
    }

    /// Pause between latency cycles, split across the node count.
    #[must_use]
    pub fn latency_pause(&self, node_count: usize) -> Duration {
        Duration::from_millis(self.latency_period_ms / node_count.max(1) as u64)
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocalConfig {
    pub chain: ChainConfig,

    #[serde(default)]
    pub tuning: TuningConfig,

    /// Directory holding the store file and the run-flag file.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("database")
}

impl FocalConfig {
    /// Loads configuration from a TOML file with `FOCAL_*` env overrides.
    ///
    /// # Errors
    /// Returns `ConfigError` when the file cannot be read or the result
    /// fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let loaded: Self = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("FOCAL").separator("__"))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Store file for this chain.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.sqlite", self.chain.name))
    }

    /// External run-flag file gating run/stop, keyed by chain name.
    #[must_use]
    pub fn run_flag_path(&self) -> PathBuf {
        self.data_dir.join("runflags.json")
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chain = &self.chain;
        if chain.nodes.is_empty() {
            return Err(ConfigError::Invalid("at least one node is required".into()));
        }
        for node in &chain.nodes {
            let parsed = url::Url::parse(node)
                .map_err(|e| ConfigError::Invalid(format!("node url '{node}': {e}")))?;
            if !matches!(parsed.scheme(), "ws" | "wss" | "http" | "https") {
                return Err(ConfigError::Invalid(format!(
                    "node url '{node}': unsupported scheme '{}'",
                    parsed.scheme()
                )));
            }
        }
        if !chain.assets.contains(&chain.core) {
            return Err(ConfigError::Invalid(format!(
                "assets must include the core token '{}'",
                chain.core
            )));
        }
        for pair in &chain.pairs {
            let Some((base, quote)) = pair.split_once('-') else {
                return Err(ConfigError::Invalid(format!("pair '{pair}' is not BASE-QUOTE")));
            };
            for leg in [base, quote] {
                if !chain.assets.iter().any(|a| a == leg) {
                    return Err(ConfigError::Invalid(format!(
                        "pair '{pair}' references untracked asset '{leg}'"
                    )));
                }
            }
        }
        if self.tuning.collectors == 0 {
            return Err(ConfigError::Invalid("collector pool cannot be empty".into()));
        }
        if self.tuning.window == 0 {
            return Err(ConfigError::Invalid("window depth cannot be zero".into()));
        }
        if self.tuning.high_low_ratio == 0 || self.tuning.reconnect_ratio == 0 {
            return Err(ConfigError::Invalid("iteration ratios must be at least 1".into()));
        }
        Ok(())
    }
}
