//! Supervision: ordered startup, collector regeneration, shutdown.
//!
//! Startup gates strictly: store schema → first latency cycle → identifier
//! bootstrap → collector pool → first collector iteration → first oracle
//! cycle → ready. At runtime one random collector is killed and respawned
//! on a fixed interval, bounding how long any single worker can stay wedged
//! without per-call timeouts inside the worker itself. An external run-flag
//! file keyed by chain name is polled every tick; clearing it tears the
//! system down.

use crate::{
    bootstrap::BootstrapCache,
    client::TrustlessClient,
    config::FocalConfig,
    latency::LatencyClassifier,
    maven::MavenCollector,
    oracle::OracleReducer,
    rpc::RpcConnector,
    store::{Store, StoreError},
    task::KillableTask,
};
use rand::Rng;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// One collector slot: the running task and its free flag.
struct CollectorSlot {
    id: usize,
    task: KillableTask<()>,
    free: Arc<AtomicBool>,
}

/// Reads the run flag for this chain; missing files or keys default to
/// running, so the flag only ever stops a system that was told to stop.
#[must_use]
pub fn run_flag(config: &FocalConfig) -> bool {
    let Ok(text) = std::fs::read_to_string(config.run_flag_path()) else {
        return true;
    };
    serde_json::from_str::<BTreeMap<String, bool>>(&text)
        .ok()
        .and_then(|flags| flags.get(&config.chain.name).copied())
        .unwrap_or(true)
}

/// Sets or clears the run flag for this chain, preserving other chains'
/// entries.
///
/// # Errors
/// Returns an IO error if the flag file cannot be written.
pub fn set_run_flag(config: &FocalConfig, enabled: bool) -> std::io::Result<()> {
    let path = config.run_flag_path();
    let mut flags: BTreeMap<String, bool> = std::fs::read_to_string(&path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default();
    flags.insert(config.chain.name.clone(), enabled);
    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::write(path, serde_json::to_string_pretty(&flags)?)
}

/// Builds and launches the full engine.
pub struct Supervisor {
    config: Arc<FocalConfig>,
    connector: Arc<dyn RpcConnector>,
}

impl Supervisor {
    #[must_use]
    pub fn new(config: Arc<FocalConfig>, connector: Arc<dyn RpcConnector>) -> Self {
        Self { config, connector }
    }

    /// Runs the fixed startup sequence and hands back the live runtime.
    ///
    /// Blocks until every gate has passed: the store is seeded, every node
    /// has been classified once, identifiers are cached, at least one
    /// collector iteration and one oracle cycle have completed.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be opened or seeded; every
    /// later stage retries internally rather than failing.
    pub async fn deploy(self) -> Result<FocalRuntime, StoreError> {
        let config = self.config;
        let connector = self.connector;

        let store = Arc::new(Store::open(Arc::clone(&config)).await?);
        store.restart().await?;
        info!(chain = %config.chain.name, "store initialized");

        let (shutdown_tx, _) = broadcast::channel(8);

        let classifier =
            LatencyClassifier::new(Arc::clone(&config), Arc::clone(&store), Arc::clone(&connector));
        let latency_cycles = classifier.cycle_signal();
        let latency_task = classifier.start(shutdown_tx.subscribe());
        wait_for_signal(&latency_cycles, 1).await;
        info!("latency classifier initialized");

        BootstrapCache::new(Arc::clone(&config), Arc::clone(&store), Arc::clone(&connector))
            .run()
            .await;

        let iterations = Arc::new(AtomicU64::new(0));
        let collectors: Vec<CollectorSlot> = (0..config.tuning.collectors)
            .map(|id| spawn_collector(id, &config, &store, &connector, &iterations))
            .collect();
        wait_for_signal(&iterations, 1).await;
        info!(pool = config.tuning.collectors, "maven collectors initialized");

        let oracle = OracleReducer::new(Arc::clone(&config), Arc::clone(&store));
        let oracle_cycles = oracle.cycle_signal();
        let oracle_task = oracle.start(shutdown_tx.subscribe());
        wait_for_signal(&oracle_cycles, 1).await;
        info!("oracle reducer initialized");

        let supervision_task = tokio::spawn(Self::supervise(
            Arc::clone(&config),
            Arc::clone(&store),
            Arc::clone(&connector),
            Arc::clone(&iterations),
            collectors,
            shutdown_tx.clone(),
        ));
        info!(chain = %config.chain.name, "engine ready");

        Ok(FocalRuntime {
            config,
            store,
            shutdown_tx,
            latency_task,
            oracle_task,
            supervision_task,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Runtime supervision loop: run-flag polling and scheduled
    /// regeneration.
    async fn supervise(
        config: Arc<FocalConfig>,
        store: Arc<Store>,
        connector: Arc<dyn RpcConnector>,
        iterations: Arc<AtomicU64>,
        mut collectors: Vec<CollectorSlot>,
        shutdown_tx: broadcast::Sender<()>,
    ) {
        let mut shutdown_rx = shutdown_tx.subscribe();
        let tick = config.tuning.supervisor_tick();
        let mut since_regeneration = Duration::ZERO;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                () = tokio::time::sleep(tick) => {}
            }
            if !run_flag(&config) {
                info!(chain = %config.chain.name, "run flag cleared, shutting down");
                let _ = shutdown_tx.send(());
                break;
            }
            since_regeneration += tick;
            if since_regeneration >= Duration::from_millis(config.tuning.regeneration_ms) {
                since_regeneration = Duration::ZERO;
                let victim = rand::thread_rng().gen_range(0..collectors.len());
                Self::regenerate(&config, &store, &connector, &iterations, &mut collectors[victim])
                    .await;
            }
        }
        for slot in &collectors {
            slot.task.kill();
        }
        debug!("collector pool terminated");
    }

    /// Kills and respawns one collector.
    ///
    /// The free flag is cleared first and the grace pause lets any in-flight
    /// write commit or abort cleanly; then the kill is unconditional, so a
    /// worker wedged in a blocking call is replaced no matter what.
    async fn regenerate(
        config: &Arc<FocalConfig>,
        store: &Arc<Store>,
        connector: &Arc<dyn RpcConnector>,
        iterations: &Arc<AtomicU64>,
        slot: &mut CollectorSlot,
    ) {
        slot.free.store(false, Ordering::SeqCst);
        tokio::time::sleep(config.tuning.kill_grace()).await;
        slot.task.kill();
        *slot = spawn_collector(slot.id, config, store, connector, iterations);
        info!(collector = slot.id, "collector regenerated");
    }
}

fn spawn_collector(
    id: usize,
    config: &Arc<FocalConfig>,
    store: &Arc<Store>,
    connector: &Arc<dyn RpcConnector>,
    iterations: &Arc<AtomicU64>,
) -> CollectorSlot {
    let free = Arc::new(AtomicBool::new(true));
    let task = MavenCollector::new(
        id,
        Arc::clone(config),
        Arc::clone(store),
        Arc::clone(connector),
        Arc::clone(&free),
        Arc::clone(iterations),
    )
    .spawn();
    CollectorSlot { id, task, free }
}

async fn wait_for_signal(signal: &AtomicU64, target: u64) {
    while signal.load(Ordering::SeqCst) < target {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// The live engine: owns every background task and the store.
pub struct FocalRuntime {
    config: Arc<FocalConfig>,
    store: Arc<Store>,
    shutdown_tx: broadcast::Sender<()>,
    latency_task: JoinHandle<()>,
    oracle_task: JoinHandle<()>,
    supervision_task: JoinHandle<()>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl FocalRuntime {
    /// Read-only facade over the oracle view.
    #[must_use]
    pub fn client(&self) -> TrustlessClient {
        TrustlessClient::new(Arc::clone(&self.store))
    }

    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &Arc<FocalConfig> {
        &self.config
    }

    /// A receiver resolving when the engine begins tearing down.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Whether the supervision loop is still alive (it exits when the run
    /// flag is cleared or shutdown is requested).
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.supervision_task.is_finished()
    }

    /// Initiates shutdown and waits for every background task to stop.
    /// Idempotent with respect to an already-delivered run-flag shutdown.
    pub async fn shutdown(self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("shutdown already initiated, ignoring duplicate call");
            return;
        }
        info!(chain = %self.config.chain.name, "engine shutdown initiated");
        let _ = self.shutdown_tx.send(());

        for (label, task) in [
            ("supervision", self.supervision_task),
            ("latency", self.latency_task),
            ("oracle", self.oracle_task),
        ] {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(())) => debug!(task = label, "task stopped"),
                Ok(Err(e)) if e.is_cancelled() => debug!(task = label, "task cancelled"),
                Ok(Err(e)) => error!(task = label, error = %e, "task failed"),
                Err(_) => warn!(task = label, "task did not stop in time"),
            }
        }
        info!("engine shutdown complete");
    }
}
