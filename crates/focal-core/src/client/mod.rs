//! Read-only facade over the oracle view.
//!
//! Downstream code (strategy loops, the external signing pipeline, UIs)
//! reads the consensus state through these accessors and never touches the
//! network. Every call performs one fresh store read and returns a typed
//! whole-table snapshot; consistency across calls within one logical
//! operation is the caller's responsibility.

use crate::store::{
    records::{
        AccountRecord, AssetRecord, ChainRecord, NodeRecord, ObjectRecord, PairRecord,
        TimingRecord,
    },
    Store, StoreError,
};
use std::{collections::HashMap, sync::Arc};

/// Synchronous-feel accessors over the shared store.
#[derive(Clone)]
pub struct TrustlessClient {
    store: Arc<Store>,
}

impl TrustlessClient {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Chain name and id.
    ///
    /// # Errors
    /// Returns `StoreError` if the store is unreachable.
    pub async fn chain(&self) -> Result<ChainRecord, StoreError> {
        self.store.chain().await
    }

    /// The watched account's reduced state.
    ///
    /// # Errors
    /// Returns `StoreError` if the store is unreachable.
    pub async fn account(&self) -> Result<AccountRecord, StoreError> {
        self.store.account().await
    }

    /// All tracked assets, keyed by symbol.
    ///
    /// # Errors
    /// Returns `StoreError` if the store is unreachable.
    pub async fn assets(&self) -> Result<HashMap<String, AssetRecord>, StoreError> {
        Ok(self
            .store
            .assets()
            .await?
            .into_iter()
            .map(|asset| (asset.name.clone(), asset))
            .collect())
    }

    /// The object-id registry, keyed by id.
    ///
    /// # Errors
    /// Returns `StoreError` if the store is unreachable.
    pub async fn objects(&self) -> Result<HashMap<String, ObjectRecord>, StoreError> {
        Ok(self
            .store
            .objects()
            .await?
            .into_iter()
            .map(|object| (object.id.clone(), object))
            .collect())
    }

    /// All tracked pairs, keyed by market symbol.
    ///
    /// # Errors
    /// Returns `StoreError` if the store is unreachable.
    pub async fn pairs(&self) -> Result<HashMap<String, PairRecord>, StoreError> {
        Ok(self
            .store
            .pairs()
            .await?
            .into_iter()
            .map(|pair| (pair.name.clone(), pair))
            .collect())
    }

    /// Latest classification of every configured node, keyed by url.
    ///
    /// # Errors
    /// Returns `StoreError` if the store is unreachable.
    pub async fn nodes(&self) -> Result<HashMap<String, NodeRecord>, StoreError> {
        Ok(self
            .store
            .nodes()
            .await?
            .into_iter()
            .map(|node| (node.url.clone(), node))
            .collect())
    }

    /// Reduced timing values: block height/time, medians, server stamp.
    ///
    /// # Errors
    /// Returns `StoreError` if the store is unreachable.
    pub async fn timing(&self) -> Result<TimingRecord, StoreError> {
        self.store.timing().await
    }

    /// Healthy node URLs, ascending by ping.
    ///
    /// # Errors
    /// Returns `StoreError` if the store is unreachable.
    pub async fn whitelist(&self) -> Result<Vec<String>, StoreError> {
        self.store.whitelist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ChainConfig, FocalConfig, TuningConfig},
        types::{Sample, Tracker},
    };
    use serde_json::json;
    use tempfile::TempDir;

    async fn seeded() -> (TrustlessClient, Arc<Store>, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(FocalConfig {
            chain: ChainConfig {
                name: "testchain".into(),
                chain_id: "chain-a".into(),
                account: "trader-1".into(),
                core: "CORE".into(),
                nodes: vec!["wss://a.example.com".into(), "wss://b.example.com".into()],
                assets: vec!["CORE".into(), "BTC".into(), "USD".into()],
                pairs: vec!["BTC-USD".into()],
            },
            tuning: TuningConfig::default(),
            data_dir: dir.path().to_path_buf(),
        });
        let store = Arc::new(Store::open(Arc::clone(&config)).await.unwrap());
        store.restart().await.unwrap();
        (TrustlessClient::new(Arc::clone(&store)), store, dir)
    }

    #[tokio::test]
    async fn test_snapshots_are_keyed() {
        let (client, _store, _dir) = seeded().await;
        assert_eq!(client.chain().await.unwrap().name, "testchain");
        assert!(client.assets().await.unwrap().contains_key("BTC"));
        assert!(client.pairs().await.unwrap().contains_key("USD-BTC"));
        assert!(client.nodes().await.unwrap().contains_key("wss://a.example.com"));
        assert!(client.objects().await.unwrap().contains_key("1.3.0"));
        assert_eq!(client.timing().await.unwrap().name, "trader-1");
    }

    #[tokio::test]
    async fn test_reads_are_fresh_per_call() {
        let (client, store, _dir) = seeded().await;
        assert!((client.pairs().await.unwrap()["BTC-USD"].last).abs() < f64::EPSILON);

        store.write_public(Tracker::Last, "BTC-USD", &json!(0.9)).await.unwrap();
        assert!((client.pairs().await.unwrap()["BTC-USD"].last - 0.9).abs() < 1e-12);

        // windows are invisible to the facade until reduced
        store
            .append_sample(Tracker::Last, "BTC-USD", &Sample::new(json!(0.1)))
            .await
            .unwrap();
        assert!((client.pairs().await.unwrap()["BTC-USD"].last - 0.9).abs() < 1e-12);
    }
}
