//! End-to-end supervisor tests against the mock network.
//!
//! These drive the full startup sequence (store, latency, bootstrap,
//! collectors, oracle) plus regeneration liveness and run-flag shutdown,
//! with tuning shrunk to milliseconds.

use crate::mock_infrastructure::MockNet;
use focal_core::{
    config::{ChainConfig, FocalConfig, TuningConfig},
    supervisor::{set_run_flag, Supervisor},
    FocalRuntime,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tempfile::TempDir;

fn fast_config(dir: &TempDir) -> Arc<FocalConfig> {
    Arc::new(FocalConfig {
        chain: ChainConfig {
            name: "testchain".into(),
            chain_id: "chain-a".into(),
            account: "trader-1".into(),
            core: "CORE".into(),
            nodes: vec!["wss://a.example.com".into(), "wss://b.example.com".into()],
            assets: vec!["CORE".into(), "BTC".into(), "USD".into()],
            pairs: vec!["BTC-USD".into()],
        },
        tuning: TuningConfig {
            collectors: 2,
            window: 7,
            probe_timeout_ms: 500,
            latency_period_ms: 200,
            bootstrap_join_ms: 2_000,
            bootstrap_restart_ms: 3_000,
            reconnect_ratio: 5,
            high_low_ratio: 5,
            collector_pause_ms: 1,
            oracle_pause_ms: 0,
            max_ping: 5.0,
            regeneration_ms: 300,
            supervisor_tick_ms: 50,
            kill_grace_ms: 10,
            store_max_backoff_ms: 5_000,
        },
        data_dir: dir.path().to_path_buf(),
    })
}

async fn deploy(net: &MockNet, config: Arc<FocalConfig>) -> FocalRuntime {
    tokio::time::timeout(
        Duration::from_secs(30),
        Supervisor::new(config, net.connector()).deploy(),
    )
    .await
    .expect("deploy must reach ready")
    .expect("deploy must succeed")
}

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let limit = Instant::now() + deadline;
    while Instant::now() < limit {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deploy_reaches_ready_with_consensus_state() {
    let dir = TempDir::new().unwrap();
    let net = MockNet::healthy("chain-a", "trader-1");
    net.set_last("BTC-USD", 0.5);
    let runtime = deploy(&net, fast_config(&dir)).await;
    let client = runtime.client();

    // latency gate: every node classified, healthy ones whitelisted
    assert_eq!(client.whitelist().await.unwrap().len(), 2);

    // bootstrap gate: identifiers fixed by the vote
    let account = client.account().await.unwrap();
    assert_eq!(account.id.as_deref(), Some("1.2.777"));
    let assets = client.assets().await.unwrap();
    assert_eq!(assets["BTC"].id.as_deref(), Some("1.3.9"));
    assert_eq!(assets["BTC"].precision, 8);

    // oracle gate: the server stamp is fresh wall clock
    assert!(client.timing().await.unwrap().server > 0.0);

    // consensus flows end to end: collectors sample 0.5, oracle reduces it
    let reached = {
        let client = client.clone();
        let limit = Instant::now() + Duration::from_secs(10);
        let mut reached = false;
        while Instant::now() < limit {
            let pairs = client.pairs().await.unwrap();
            if (pairs["BTC-USD"].last - 0.5).abs() < 1e-9 {
                reached = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        reached
    };
    assert!(reached, "last price consensus never reached the public row");

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wedged_collectors_are_replaced_within_regeneration() {
    let dir = TempDir::new().unwrap();
    let net = MockNet::healthy("chain-a", "trader-1");
    net.set_last("BTC-USD", 0.5);
    let runtime = deploy(&net, fast_config(&dir)).await;

    // sampling is flowing
    let flowing = {
        let net = net.clone();
        wait_until(Duration::from_secs(5), move || net.last_call_count() > 0).await
    };
    assert!(flowing, "collectors never sampled");

    // wedge the network: every in-flight and future call parks forever
    net.set_hang(true);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let stalled_at = net.last_call_count();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(net.last_call_count(), stalled_at, "all collectors should be wedged");

    // release new calls; the wedged workers stay parked, so fresh samples
    // can only come from collectors the supervisor forcibly replaced
    net.set_hang(false);
    let resumed = {
        let net = net.clone();
        wait_until(Duration::from_secs(10), move || net.last_call_count() > stalled_at).await
    };
    assert!(resumed, "regeneration never revived sampling");

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cleared_run_flag_stops_the_engine() {
    let dir = TempDir::new().unwrap();
    let net = MockNet::healthy("chain-a", "trader-1");
    net.set_last("BTC-USD", 0.5);
    let config = fast_config(&dir);
    let runtime = deploy(&net, Arc::clone(&config)).await;
    assert!(runtime.is_running());

    set_run_flag(&config, false).unwrap();
    let stopped = wait_until(Duration::from_secs(5), || !runtime.is_running()).await;
    assert!(stopped, "supervision loop should observe the cleared flag");

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_store_survives_deploy_restart() {
    // deploying twice over the same data dir recreates the schema cleanly
    let dir = TempDir::new().unwrap();
    let net = MockNet::healthy("chain-a", "trader-1");
    net.set_last("BTC-USD", 0.5);

    let runtime = deploy(&net, fast_config(&dir)).await;
    runtime.shutdown().await;

    let runtime = deploy(&net, fast_config(&dir)).await;
    let account = runtime.client().account().await.unwrap();
    assert_eq!(account.id.as_deref(), Some("1.2.777"));
    runtime.shutdown().await;
}
