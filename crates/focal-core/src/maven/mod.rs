//! Maven collectors: the sampling worker pool.
//!
//! Each collector is an isolated long-running killable task holding only
//! its own RPC connection and loop counters; all coordination happens
//! through the store plus one "free" flag per worker. The supervisor clears
//! the flag just before a forced kill, and the write helper checks it
//! before touching the store, so a worker is never killed mid-write.
//!
//! A single field fetch failing is logged and skipped; the worker carries
//! on. Collectors targeting the same field race at the store layer, but a
//! lost update only costs one sample, since windows are unordered
//! recent-sample multisets rather than logs.

use crate::{
    config::FocalConfig,
    rpc::{NodeRpc, RpcConnector},
    store::Store,
    task::KillableTask,
    types::{Sample, Tracker},
    utils::{invert_pair, round_latency},
};
use rand::seq::SliceRandom;
use serde_json::{json, Value};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tracing::debug;

/// One sampling worker.
pub struct MavenCollector {
    id: usize,
    config: Arc<FocalConfig>,
    store: Arc<Store>,
    connector: Arc<dyn RpcConnector>,
    /// Cleared by the supervisor before a forced kill; checked before every
    /// store write.
    free: Arc<AtomicBool>,
    /// Iteration signal shared across the pool.
    iterations: Arc<AtomicU64>,
}

impl MavenCollector {
    #[must_use]
    pub fn new(
        id: usize,
        config: Arc<FocalConfig>,
        store: Arc<Store>,
        connector: Arc<dyn RpcConnector>,
        free: Arc<AtomicBool>,
        iterations: Arc<AtomicU64>,
    ) -> Self {
        Self { id, config, store, connector, free, iterations }
    }

    /// Spawns the worker as a killable task.
    #[must_use]
    pub fn spawn(self) -> KillableTask<()> {
        let label = format!("maven:{}", self.id);
        KillableTask::spawn(label, self.run())
    }

    async fn run(self) {
        let pause = self.config.tuning.collector_pause();
        let account = self.config.chain.account.clone();
        let mut rpc = self.connect().await;
        loop {
            // sample the store's own read latency from a fresh table read
            let started = Instant::now();
            if self.store.pairs().await.is_ok() {
                let elapsed = round_latency(started.elapsed().as_secs_f64());
                self.append(Tracker::Read, &account, json!(elapsed)).await;
            }
            tokio::time::sleep(pause).await;

            let iteration = self.iterations.load(Ordering::SeqCst);
            if iteration % self.config.tuning.reconnect_ratio == 0 {
                // bound connection-level resource leakage
                rpc = self.connect().await;
            }
            if iteration % self.config.tuning.high_low_ratio == 0 {
                self.low_frequency(rpc.as_ref()).await;
            } else {
                self.high_frequency(rpc.as_ref()).await;
            }
            self.iterations.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(pause).await;
        }
    }

    /// Account-, asset-, and fee-schedule data that changes rarely.
    async fn low_frequency(&self, rpc: &dyn NodeRpc) {
        let pause = self.config.tuning.collector_pause();
        let account = self.config.chain.account.clone();

        tokio::time::sleep(pause).await;
        match rpc.fees_account().await {
            Ok(fees) => self.append(Tracker::FeesAccount, &account, fees).await,
            Err(e) => self.skip(Tracker::FeesAccount, &e),
        }
        tokio::time::sleep(pause).await;
        match rpc.is_lifetime_member().await {
            Ok(ltm) => self.append(Tracker::Ltm, &account, json!(ltm)).await,
            Err(e) => self.skip(Tracker::Ltm, &e),
        }
        tokio::time::sleep(pause).await;
        match rpc.current_supply().await {
            Ok(supply) => {
                for asset in &self.config.chain.assets {
                    if let Some(value) = supply.get(asset) {
                        self.append(Tracker::Supply, asset, value.clone()).await;
                    }
                }
            }
            Err(e) => self.skip(Tracker::Supply, &e),
        }
        tokio::time::sleep(pause).await;
        match rpc.lookup_asset_symbols().await {
            Ok(symbols) => {
                for asset in &self.config.chain.assets {
                    if let Some(symbol) = symbols.get(asset) {
                        match serde_json::to_value(symbol) {
                            Ok(value) => self.append(Tracker::FeesAsset, asset, value).await,
                            Err(e) => debug!(collector = self.id, error = %e, "asset symbol unserializable"),
                        }
                    }
                }
            }
            Err(e) => self.skip(Tracker::FeesAsset, &e),
        }
    }

    /// Market data and account stream, sampled every ordinary iteration.
    async fn high_frequency(&self, rpc: &dyn NodeRpc) {
        let pause = self.config.tuning.collector_pause();
        let account = self.config.chain.account.clone();
        let pairs = self.config.chain.pairs.clone();

        tokio::time::sleep(pause).await;
        match rpc.operations().await {
            Ok(operations) => {
                // cancel operations carry no pair data; they live on the
                // account row
                self.append(Tracker::Cancels, &account, operations.cancels.clone()).await;
                for pair in &pairs {
                    if let Some(ops) = operations.by_pair.get(pair) {
                        self.append(Tracker::Ops, pair, ops.clone()).await;
                    }
                }
            }
            Err(e) => self.skip(Tracker::Ops, &e),
        }
        tokio::time::sleep(pause).await;
        match rpc.open_orders().await {
            Ok(opens) => {
                for pair in &pairs {
                    if let Some(orders) = opens.get(pair) {
                        self.append(Tracker::Opens, pair, orders.clone()).await;
                    }
                }
            }
            Err(e) => self.skip(Tracker::Opens, &e),
        }

        for pair in &pairs {
            tokio::time::sleep(pause).await;
            self.sample_last(rpc, pair).await;
            tokio::time::sleep(pause).await;
            match rpc.book(pair).await {
                Ok(book) => self.append(Tracker::Book, pair, book).await,
                Err(e) => self.skip(Tracker::Book, &e),
            }
            tokio::time::sleep(pause).await;
            match rpc.fill_order_history(pair).await {
                Ok(fills) => self.append(Tracker::Fills, pair, fills).await,
                Err(e) => self.skip(Tracker::Fills, &e),
            }
            tokio::time::sleep(pause).await;
            match rpc.market_history(pair, 100).await {
                Ok(history) => self.append(Tracker::History, pair, history).await,
                Err(e) => self.skip(Tracker::History, &e),
            }
        }

        // exchange rates back to the core token
        for pair in self.config.chain.core_pairs() {
            tokio::time::sleep(pause).await;
            self.sample_last(rpc, &pair).await;
        }

        tokio::time::sleep(pause).await;
        match rpc.account_balances().await {
            Ok(balances) => {
                for asset in &self.config.chain.assets {
                    if let Some(balance) = balances.get(asset) {
                        self.append(Tracker::Balance, asset, balance.clone()).await;
                    }
                }
            }
            Err(e) => self.skip(Tracker::Balance, &e),
        }

        tokio::time::sleep(pause).await;
        match rpc.block_number().await {
            Ok(number) => self.append(Tracker::Blocknum, &account, json!(number)).await,
            Err(e) => self.skip(Tracker::Blocknum, &e),
        }
        tokio::time::sleep(pause).await;
        match rpc.blocktime().await {
            Ok(time) => self.append(Tracker::Blocktime, &account, json!(time)).await,
            Err(e) => self.skip(Tracker::Blocktime, &e),
        }
    }

    /// Samples a pair's last price and its inversion.
    async fn sample_last(&self, rpc: &dyn NodeRpc, pair: &str) {
        match rpc.last(pair).await {
            Ok(last) => {
                self.append(Tracker::Last, pair, json!(last)).await;
                if last > 0.0 {
                    self.append(Tracker::Last, &invert_pair(pair), json!(1.0 / last)).await;
                }
            }
            Err(e) => self.skip(Tracker::Last, &e),
        }
    }

    /// Appends one sample, honoring the free flag and the empty-fills rule.
    async fn append(&self, tracker: Tracker, key: &str, value: Value) {
        let sample = Sample::new(value);
        if tracker == Tracker::Fills && sample.is_empty() {
            return;
        }
        // flag cleared means a forced kill is imminent; stay out of the
        // store so the kill never lands mid-write
        if !self.free.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.store.append_sample(tracker, key, &sample).await {
            debug!(
                collector = self.id,
                column = tracker.column(),
                key,
                error = %e,
                "sample append failed"
            );
        }
    }

    fn skip(&self, tracker: Tracker, error: &dyn std::fmt::Display) {
        debug!(collector = self.id, column = tracker.column(), error = %error, "field fetch failed");
    }

    /// Connects through the current whitelist, retrying until a node
    /// answers. The ranked list is shuffled so the pool spreads across
    /// healthy nodes instead of piling onto the fastest.
    async fn connect(&self) -> Box<dyn NodeRpc> {
        loop {
            let mut whitelist = self.store.whitelist().await.unwrap_or_default();
            {
                let mut rng = rand::thread_rng();
                whitelist.shuffle(&mut rng);
            }
            match self.connector.connect(&whitelist).await {
                Ok(rpc) => return rpc,
                Err(e) => {
                    debug!(collector = self.id, error = %e, "reconnect failed, retrying");
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
            }
        }
    }
}
