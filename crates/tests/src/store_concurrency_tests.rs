//! Concurrent-write safety against one shared store file.
//!
//! Collectors race at the store layer by design; these tests drive the
//! retry helper under real contention and verify no append is lost or
//! corrupted once every writer has been retried to success.

use focal_core::{
    config::{ChainConfig, FocalConfig, TuningConfig},
    store::{Bind, Statement, Store},
    types::{NodeStatus, Sample, Tracker},
};
use serde_json::json;
use std::{collections::HashSet, sync::Arc};
use tempfile::TempDir;

fn test_config(dir: &TempDir, window: usize) -> Arc<FocalConfig> {
    Arc::new(FocalConfig {
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
        tuning: TuningConfig { window, ..TuningConfig::default() },
        data_dir: dir.path().to_path_buf(),
    })
}

async fn seeded_store(window: usize) -> (Arc<Store>, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let store =
        Arc::new(Store::open(test_config(&dir, window)).await.expect("open store"));
    store.restart().await.expect("restart");
    (store, dir)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_lose_nothing() {
    let (store, _dir) = seeded_store(64).await;

    let writers: Vec<_> = (0..16)
        .map(|n| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store.append_sample(Tracker::Last, "BTC-USD", &Sample::new(json!(n))).await
            })
        })
        .collect();
    for writer in writers {
        writer.await.expect("writer task").expect("append retried to success");
    }

    let window = store.read_window(Tracker::Last, "BTC-USD").await.unwrap();
    assert_eq!(window.len(), 16, "every concurrent append must land");
    let values: HashSet<i64> =
        window.iter().map(|s| s.value().as_i64().expect("intact sample")).collect();
    assert_eq!(values.len(), 16, "no append may be duplicated or corrupted");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_respect_window_bound() {
    let (store, _dir) = seeded_store(7).await;

    let writers: Vec<_> = (0..32)
        .map(|n| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store.append_sample(Tracker::Last, "BTC-USD", &Sample::new(json!(n))).await
            })
        })
        .collect();
    for writer in writers {
        writer.await.expect("writer task").expect("append retried to success");
    }

    let window = store.read_window(Tracker::Last, "BTC-USD").await.unwrap();
    assert_eq!(window.len(), 7, "window must never exceed its depth");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_appends_race_batched_updates() {
    let (store, _dir) = seeded_store(64).await;

    let mut tasks = Vec::new();
    for n in 0..8 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store.append_sample(Tracker::Last, "BTC-USD", &Sample::new(json!(n))).await
        }));
    }
    for n in 0..8 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store
                .execute(vec![Statement::new(
                    "UPDATE nodes SET ping = ?, code = ?, status = ? WHERE url = ?",
                    vec![
                        Bind::Real(0.1 + n as f64),
                        Bind::Int(NodeStatus::Connected.code()),
                        Bind::Text(NodeStatus::Connected.as_str().into()),
                        Bind::Text("wss://a.example.com".into()),
                    ],
                )])
                .await
                .map(|_| ())
        }));
    }
    for task in tasks {
        task.await.expect("task").expect("operation retried to success");
    }

    let window = store.read_window(Tracker::Last, "BTC-USD").await.unwrap();
    assert_eq!(window.len(), 8);
    let node = store
        .nodes()
        .await
        .unwrap()
        .into_iter()
        .find(|n| n.url == "wss://a.example.com")
        .unwrap();
    assert_eq!(node.code, NodeStatus::Connected.code());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_stores_share_one_backing_file() {
    // two Store handles over the same file model two independent processes
    let dir = TempDir::new().expect("tempdir");
    let config = test_config(&dir, 64);
    let writer = Arc::new(Store::open(Arc::clone(&config)).await.unwrap());
    writer.restart().await.unwrap();
    let reader = Arc::new(Store::open(config).await.unwrap());

    let mut tasks = Vec::new();
    for n in 0..8 {
        let store = Arc::clone(&writer);
        tasks.push(tokio::spawn(async move {
            store.append_sample(Tracker::Last, "BTC-USD", &Sample::new(json!(n))).await
        }));
    }
    for n in 8..16 {
        let store = Arc::clone(&reader);
        tasks.push(tokio::spawn(async move {
            store.append_sample(Tracker::Last, "BTC-USD", &Sample::new(json!(n))).await
        }));
    }
    for task in tasks {
        task.await.expect("task").expect("append retried to success");
    }

    assert_eq!(reader.read_window(Tracker::Last, "BTC-USD").await.unwrap().len(), 16);
}
