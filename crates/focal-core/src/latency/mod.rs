//! Node latency classification.
//!
//! Periodically probes the configured nodes and persists a status code,
//! ping, and handshake latency for each; the whitelist consumed by every
//! other component is derived from these rows. The first cycle probes all
//! nodes at once, subsequent cycles re-probe one random node, so a bad node
//! is re-evaluated within one period without hammering the fleet.
//!
//! Each probe runs as an isolated killable task under a hard deadline: a
//! wedged connection attempt cannot stall the cycle, it is killed and the
//! node classified `CONNECTION TIMEOUT`.

use crate::{
    config::FocalConfig,
    rpc::{RpcConnector, RpcError},
    store::{Bind, Statement, Store},
    task::KillableTask,
    types::{NodeStatus, ProbeOutcome, LATENCY_SENTINEL},
    utils::{round_latency, unix_now},
};
use futures_util::future::join_all;
use rand::seq::SliceRandom;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Result of one node probe, complete or not.
#[derive(Debug, Clone)]
struct ProbeReport {
    url: String,
    ping: f64,
    handshake: f64,
    blocktime: i64,
    status: NodeStatus,
    /// `None` when the probe never got far enough to check.
    has_history: Option<bool>,
}

impl ProbeReport {
    fn incomplete(url: String, status: NodeStatus) -> Self {
        Self {
            url,
            ping: LATENCY_SENTINEL,
            handshake: LATENCY_SENTINEL,
            blocktime: 0,
            status,
            has_history: None,
        }
    }
}

/// Forever-loop classifying the response status of every configured node.
pub struct LatencyClassifier {
    config: Arc<FocalConfig>,
    store: Arc<Store>,
    connector: Arc<dyn RpcConnector>,
    cycles: Arc<AtomicU64>,
}

impl LatencyClassifier {
    #[must_use]
    pub fn new(config: Arc<FocalConfig>, store: Arc<Store>, connector: Arc<dyn RpcConnector>) -> Self {
        Self { config, store, connector, cycles: Arc::new(AtomicU64::new(0)) }
    }

    /// Completed-cycle counter; the supervisor gates startup on the first.
    #[must_use]
    pub fn cycle_signal(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.cycles)
    }

    /// Spawns the classification loop; exits on the shutdown broadcast.
    #[must_use]
    pub fn start(&self, mut shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let config = Arc::clone(&self.config);
        let store = Arc::clone(&self.store);
        let connector = Arc::clone(&self.connector);
        let cycles = Arc::clone(&self.cycles);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = Self::run_cycle(&config, &store, &connector, &cycles) => {}
                    _ = shutdown_rx.recv() => {
                        info!("latency classifier shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// One probe cycle plus its trailing pause.
    async fn run_cycle(
        config: &Arc<FocalConfig>,
        store: &Arc<Store>,
        connector: &Arc<dyn RpcConnector>,
        cycles: &Arc<AtomicU64>,
    ) {
        let completed = cycles.load(Ordering::SeqCst);
        let nodes_to_test: Vec<String> = if completed == 0 {
            config.chain.nodes.clone()
        } else {
            let mut rng = rand::thread_rng();
            config.chain.nodes.choose(&mut rng).cloned().into_iter().collect()
        };

        let reports = Self::probe_many(config, connector, nodes_to_test).await;
        let statements: Vec<Statement> = reports.iter().map(node_update).collect();
        match store.execute(statements).await {
            Ok(_) => {
                for report in &reports {
                    debug!(
                        node = %report.url,
                        status = report.status.as_str(),
                        ping = report.ping,
                        handshake = report.handshake,
                        "node classified"
                    );
                }
            }
            Err(e) => error!(error = %e, "failed to persist latency cycle"),
        }
        let completed = cycles.fetch_add(1, Ordering::SeqCst) + 1;

        // Pause only once the initial full sweep and its follow-up are done,
        // and only while at least one node is usable; with an empty
        // whitelist the loop re-probes immediately.
        if completed > 1 {
            match store.whitelist().await {
                Ok(whitelist) if !whitelist.is_empty() => {
                    let pause = config.tuning.latency_pause(config.chain.nodes.len());
                    tokio::time::sleep(pause).await;
                }
                Ok(_) => warn!("no connected nodes, re-probing without pause"),
                Err(e) => error!(error = %e, "whitelist read failed"),
            }
        }
    }

    /// Probes each node in an isolated killable task under the probe
    /// deadline.
    async fn probe_many(
        config: &Arc<FocalConfig>,
        connector: &Arc<dyn RpcConnector>,
        nodes: Vec<String>,
    ) -> Vec<ProbeReport> {
        let deadline = config.tuning.probe_timeout();
        let joins = nodes.into_iter().map(|node| {
            let config = Arc::clone(config);
            let connector = Arc::clone(connector);
            let url = node.clone();
            let task =
                KillableTask::spawn(format!("probe:{url}"), Self::probe_node(config, connector, node));
            async move {
                match task.join_timeout(deadline).await {
                    Some(report) => report,
                    None => ProbeReport::incomplete(url, NodeStatus::ConnectionTimeout),
                }
            }
        });
        join_all(joins).await
    }

    async fn probe_node(
        config: Arc<FocalConfig>,
        connector: Arc<dyn RpcConnector>,
        node: String,
    ) -> ProbeReport {
        match Self::try_probe(&config, connector.as_ref(), &node).await {
            Ok(report) => report,
            Err(err) => {
                debug!(node = %node, error = %err, "probe failed");
                ProbeReport::incomplete(node, NodeStatus::ConnectionFailed)
            }
        }
    }

    async fn try_probe(
        config: &FocalConfig,
        connector: &dyn RpcConnector,
        node: &str,
    ) -> Result<ProbeReport, RpcError> {
        let target = [node.to_string()];

        let started = std::time::Instant::now();
        let rpc = connector.connect(&target).await?;
        let handshake = started.elapsed().as_secs_f64();

        let started = std::time::Instant::now();
        let chain_id = rpc.chain_id().await?;
        let ping = started.elapsed().as_secs_f64();

        let props = rpc.dynamic_properties().await?;
        let has_history = match config.chain.pairs.first() {
            Some(pair) => rpc.market_history(pair, 2).await.is_ok(),
            None => true,
        };

        let outcome = ProbeOutcome {
            chain_id,
            ping,
            handshake,
            blocktime: props.blocktime,
            participation: props.participation,
            has_history,
        };
        let status = outcome.classify(
            &config.chain.chain_id,
            config.tuning.max_ping,
            config.chain.skip_participation(),
            unix_now(),
        );
        let (ping, handshake) = if status == NodeStatus::Connected {
            (round_latency(ping), round_latency(handshake))
        } else {
            (LATENCY_SENTINEL, LATENCY_SENTINEL)
        };
        Ok(ProbeReport {
            url: node.to_string(),
            ping,
            handshake,
            blocktime: props.blocktime,
            status,
            has_history: Some(has_history),
        })
    }
}

fn node_update(report: &ProbeReport) -> Statement {
    match report.has_history {
        Some(has_history) => Statement::new(
            "UPDATE nodes SET ping = ?, handshake = ?, blocktime = ?, code = ?, status = ?, \
             history = ? WHERE url = ?",
            vec![
                Bind::Real(report.ping),
                Bind::Real(report.handshake),
                Bind::Int(report.blocktime),
                Bind::Int(report.status.code()),
                Bind::Text(report.status.as_str().into()),
                Bind::Int(i64::from(has_history)),
                Bind::Text(report.url.clone()),
            ],
        ),
        // Probe never completed; leave the history flag as previously known.
        None => Statement::new(
            "UPDATE nodes SET ping = ?, handshake = ?, blocktime = ?, code = ?, status = ? \
             WHERE url = ?",
            vec![
                Bind::Real(report.ping),
                Bind::Real(report.handshake),
                Bind::Int(report.blocktime),
                Bind::Int(report.status.code()),
                Bind::Text(report.status.as_str().into()),
                Bind::Text(report.url.clone()),
            ],
        ),
    }
}
