//! The oracle reducer: collapses every maven window to its public value.
//!
//! A single forever-loop mirroring the collectors' low/high-frequency
//! alternation. Public values are only overwritten from non-empty windows;
//! a degenerate window (no repeated sample) or malformed sample leaves the
//! field unchanged for the cycle and is never fatal.

pub mod reduce;

use crate::{
    config::FocalConfig,
    store::{Store, StoreError},
    types::Tracker,
    utils::unix_now,
};
use serde_json::json;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Forever-loop reducing maven windows into public oracle values.
pub struct OracleReducer {
    config: Arc<FocalConfig>,
    store: Arc<Store>,
    cycles: Arc<AtomicU64>,
}

impl OracleReducer {
    #[must_use]
    pub fn new(config: Arc<FocalConfig>, store: Arc<Store>) -> Self {
        Self { config, store, cycles: Arc::new(AtomicU64::new(0)) }
    }

    /// Completed-cycle counter; the supervisor gates readiness on the first.
    #[must_use]
    pub fn cycle_signal(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.cycles)
    }

    /// Spawns the reduction loop; exits on the shutdown broadcast.
    #[must_use]
    pub fn start(&self, mut shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let config = Arc::clone(&self.config);
        let store = Arc::clone(&self.store);
        let cycles = Arc::clone(&self.cycles);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = Self::run_cycle(&config, &store, &cycles) => {}
                    _ = shutdown_rx.recv() => {
                        info!("oracle reducer shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// One full reduction pass.
    pub(crate) async fn run_cycle(
        config: &Arc<FocalConfig>,
        store: &Arc<Store>,
        cycles: &Arc<AtomicU64>,
    ) {
        let iteration = cycles.load(Ordering::SeqCst);
        let pause = config.tuning.oracle_pause();
        let account = config.chain.account.clone();

        let mut fields: Vec<(Tracker, String)> = Vec::new();
        if iteration % config.tuning.high_low_ratio == 0 {
            for tracker in [Tracker::FeesAccount, Tracker::Ltm] {
                fields.push((tracker, account.clone()));
            }
            for asset in &config.chain.assets {
                for tracker in [Tracker::Supply, Tracker::FeesAsset] {
                    fields.push((tracker, asset.clone()));
                }
            }
            for tracker in [Tracker::Ping, Tracker::Handshake] {
                fields.push((tracker, account.clone()));
            }
        } else {
            for tracker in [Tracker::Server, Tracker::Blocknum, Tracker::Blocktime, Tracker::Read]
            {
                fields.push((tracker, account.clone()));
            }
            fields.push((Tracker::Cancels, account.clone()));
            for pair in &config.chain.pairs {
                for tracker in
                    [Tracker::Book, Tracker::History, Tracker::Fills, Tracker::Opens, Tracker::Ops]
                {
                    fields.push((tracker, pair.clone()));
                }
            }
            // every pair row gets a last price, inversions and core rates
            // included
            for pair in config.chain.all_pairs() {
                fields.push((Tracker::Last, pair));
            }
            for asset in &config.chain.assets {
                fields.push((Tracker::Balance, asset.clone()));
            }
        }

        for (tracker, key) in fields {
            tokio::time::sleep(pause).await;
            if let Err(e) = Self::reduce_field(store, tracker, &key).await {
                warn!(column = tracker.column(), key = %key, error = %e, "field reduction failed");
            }
        }
        cycles.fetch_add(1, Ordering::SeqCst);
    }

    /// Reduces one tracked field and writes its public value.
    ///
    /// An empty or degenerate window is a skip, not an error; only store
    /// failures propagate.
    async fn reduce_field(
        store: &Arc<Store>,
        tracker: Tracker,
        key: &str,
    ) -> Result<(), StoreError> {
        match tracker {
            Tracker::Server => {
                store.write_public(tracker, key, &json!(unix_now())).await?;
            }
            Tracker::Ping | Tracker::Handshake => {
                let nodes = store.nodes().await?;
                let values: Vec<f64> = nodes
                    .iter()
                    .filter(|node| node.is_connected())
                    .map(|node| if tracker == Tracker::Ping { node.ping } else { node.handshake })
                    .collect();
                match reduce::median(&values) {
                    Some(value) => store.write_public(tracker, key, &json!(value)).await?,
                    None => debug!(column = tracker.column(), "no connected nodes, skipping"),
                }
            }
            Tracker::Read => {
                let window = store.read_window(tracker, key).await?;
                let values: Vec<f64> =
                    window.iter().filter_map(|sample| sample.value().as_f64()).collect();
                match reduce::median(&values) {
                    Some(value) => store.write_public(tracker, key, &json!(value)).await?,
                    None => debug!(column = tracker.column(), "empty window, skipping"),
                }
            }
            _ if tracker.is_log() => {
                let window = store.read_window(tracker, key).await?;
                match reduce::dedup_union(&window) {
                    Some(merged) => store.write_public(tracker, key, &merged).await?,
                    None => debug!(column = tracker.column(), key, "empty log window, skipping"),
                }
            }
            _ => {
                let window = store.read_window(tracker, key).await?;
                if window.is_empty() {
                    debug!(column = tracker.column(), key, "empty window, skipping");
                    return Ok(());
                }
                match reduce::mode(&window) {
                    Some(winner) => store.write_public(tracker, key, winner.value()).await?,
                    None => {
                        debug!(column = tracker.column(), key, "degenerate window, public value unchanged");
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ChainConfig, TuningConfig},
        types::{NodeStatus, Sample},
    };
    use crate::store::{Bind, Statement};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    async fn seeded() -> (Arc<FocalConfig>, Arc<Store>, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(FocalConfig {
            chain: ChainConfig {
                name: "testchain".into(),
                chain_id: "chain-a".into(),
                account: "trader-1".into(),
                core: "CORE".into(),
                nodes: vec![
                    "wss://a.example.com".into(),
                    "wss://b.example.com".into(),
                    "wss://c.example.com".into(),
                ],
                assets: vec!["CORE".into(), "BTC".into(), "USD".into()],
                pairs: vec!["BTC-USD".into()],
            },
            tuning: TuningConfig { oracle_pause_ms: 0, ..TuningConfig::default() },
            data_dir: dir.path().to_path_buf(),
        });
        let store = Arc::new(Store::open(Arc::clone(&config)).await.unwrap());
        store.restart().await.unwrap();
        (config, store, dir)
    }

    async fn append_all(store: &Store, tracker: Tracker, key: &str, values: &[Value]) {
        for value in values {
            store.append_sample(tracker, key, &Sample::new(value.clone())).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_consensus_majority_lands_in_public_row() {
        let (_config, store, _dir) = seeded().await;
        append_all(
            &store,
            Tracker::Last,
            "BTC-USD",
            &[json!(0.5), json!(0.5), json!(0.5), json!(0.7), json!(0.7)],
        )
        .await;

        OracleReducer::reduce_field(&store, Tracker::Last, "BTC-USD").await.unwrap();
        let pair =
            store.pairs().await.unwrap().into_iter().find(|p| p.name == "BTC-USD").unwrap();
        assert!((pair.last - 0.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_empty_fills_window_leaves_public_untouched() {
        let (_config, store, _dir) = seeded().await;
        // mark the public fills with a sentinel so an overwrite is visible
        store
            .execute(vec![Statement::new(
                "UPDATE pairs SET fills = ? WHERE name = ?",
                vec![Bind::Text(r#"[{"sentinel":true}]"#.into()), Bind::Text("BTC-USD".into())],
            )])
            .await
            .unwrap();

        OracleReducer::reduce_field(&store, Tracker::Fills, "BTC-USD").await.unwrap();
        let pair =
            store.pairs().await.unwrap().into_iter().find(|p| p.name == "BTC-USD").unwrap();
        assert_eq!(pair.fills, json!([{"sentinel": true}]));
    }

    #[tokio::test]
    async fn test_degenerate_window_leaves_public_unchanged() {
        let (_config, store, _dir) = seeded().await;
        store.write_public(Tracker::Last, "BTC-USD", &json!(0.42)).await.unwrap();
        append_all(&store, Tracker::Last, "BTC-USD", &[json!(0.1), json!(0.2), json!(0.3)]).await;

        OracleReducer::reduce_field(&store, Tracker::Last, "BTC-USD").await.unwrap();
        let pair =
            store.pairs().await.unwrap().into_iter().find(|p| p.name == "BTC-USD").unwrap();
        assert!((pair.last - 0.42).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_cancels_reduce_by_union() {
        let (_config, store, _dir) = seeded().await;
        append_all(
            &store,
            Tracker::Cancels,
            "trader-1",
            &[json!([{"op": 1}]), json!([{"op": 2}, {"op": 1}])],
        )
        .await;

        OracleReducer::reduce_field(&store, Tracker::Cancels, "trader-1").await.unwrap();
        let account = store.account().await.unwrap();
        assert_eq!(account.cancels, json!([{"op": 1}, {"op": 2}]));
    }

    #[tokio::test]
    async fn test_ping_median_over_connected_nodes() {
        let (_config, store, _dir) = seeded().await;
        let update = |url: &str, status: NodeStatus, ping: f64| {
            Statement::new(
                "UPDATE nodes SET ping = ?, handshake = ?, code = ?, status = ? WHERE url = ?",
                vec![
                    Bind::Real(ping),
                    Bind::Real(ping * 2.0),
                    Bind::Int(status.code()),
                    Bind::Text(status.as_str().into()),
                    Bind::Text(url.into()),
                ],
            )
        };
        store
            .execute(vec![
                update("wss://a.example.com", NodeStatus::Connected, 0.1),
                update("wss://b.example.com", NodeStatus::Connected, 0.3),
                update("wss://c.example.com", NodeStatus::ConnectionFailed, 9999.0),
            ])
            .await
            .unwrap();

        OracleReducer::reduce_field(&store, Tracker::Ping, "trader-1").await.unwrap();
        let timing = store.timing().await.unwrap();
        assert!((timing.ping - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_server_field_is_wall_clock_stamp() {
        let (_config, store, _dir) = seeded().await;
        let before = unix_now();
        OracleReducer::reduce_field(&store, Tracker::Server, "trader-1").await.unwrap();
        let timing = store.timing().await.unwrap();
        assert!(timing.server >= before - 1.0);
    }

    #[tokio::test]
    async fn test_full_cycle_increments_signal() {
        let (config, store, _dir) = seeded().await;
        let reducer = OracleReducer::new(Arc::clone(&config), Arc::clone(&store));
        let cycles = reducer.cycle_signal();
        OracleReducer::run_cycle(&config, &store, &cycles).await;
        assert_eq!(cycles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_blocknum_mode_lands_in_timing() {
        let (_config, store, _dir) = seeded().await;
        append_all(
            &store,
            Tracker::Blocknum,
            "trader-1",
            &[json!(100), json!(101), json!(101)],
        )
        .await;
        OracleReducer::reduce_field(&store, Tracker::Blocknum, "trader-1")
            .await
            .unwrap();
        assert_eq!(store.timing().await.unwrap().blocknum, 101);
    }
}
