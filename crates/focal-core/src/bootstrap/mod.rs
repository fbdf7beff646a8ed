//! One-shot identifier bootstrap.
//!
//! Before any collector starts, the chain's identifiers (account id, asset
//! ids, precisions, fee schedules) are resolved by majority vote across the
//! configured nodes and written to the store exactly once. Each attempt is
//! disposable: it runs inside a killable task bounded by the restart
//! timeout, and a failed or expired attempt is discarded and retried from
//! scratch, unboundedly, until one succeeds.

use crate::{
    config::FocalConfig,
    oracle::reduce,
    rpc::{AssetSymbol, RpcConnector, RpcError},
    store::{Bind, Statement, Store, StoreError, CORE_ASSET_ID},
    task::KillableTask,
    types::Sample,
    utils::invert_pair,
};
use serde::Deserialize;
use serde_json::json;
use std::{
    collections::HashMap,
    sync::Arc,
    time::Instant,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why one bootstrap attempt was discarded.
#[derive(Error, Debug)]
enum BootstrapError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no node returned a usable identifier sample")]
    NoSamples,

    #[error("winning sample is missing asset '{0}'")]
    MissingAsset(String),

    #[error("winning sample malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The identifier data one node reports, also the unit of the vote.
#[derive(Debug, Clone, Deserialize)]
struct IdentifierData {
    account_id: String,
    assets: HashMap<String, AssetSymbol>,
}

/// One-shot majority-vote resolution of chain identifiers.
pub struct BootstrapCache {
    config: Arc<FocalConfig>,
    store: Arc<Store>,
    connector: Arc<dyn RpcConnector>,
}

impl BootstrapCache {
    #[must_use]
    pub fn new(config: Arc<FocalConfig>, store: Arc<Store>, connector: Arc<dyn RpcConnector>) -> Self {
        Self { config, store, connector }
    }

    /// Runs disposable attempts until one writes the identifier cache.
    pub async fn run(&self) {
        let lifespan = self.config.tuning.bootstrap_restart();
        let mut attempt_no: u64 = 0;
        loop {
            attempt_no += 1;
            let task = KillableTask::spawn(
                format!("bootstrap:{attempt_no}"),
                Self::attempt(
                    Arc::clone(&self.config),
                    Arc::clone(&self.store),
                    Arc::clone(&self.connector),
                ),
            );
            match task.join_timeout(lifespan).await {
                Some(Ok(())) => {
                    info!(attempt = attempt_no, "identifier cache initialized");
                    return;
                }
                Some(Err(e)) => warn!(attempt = attempt_no, error = %e, "bootstrap attempt failed"),
                None => warn!(attempt = attempt_no, "bootstrap attempt timed out"),
            }
        }
    }

    /// One probe-and-vote attempt.
    async fn attempt(
        config: Arc<FocalConfig>,
        store: Arc<Store>,
        connector: Arc<dyn RpcConnector>,
    ) -> Result<(), BootstrapError> {
        let nodes = config.chain.nodes.clone();
        let tasks: Vec<KillableTask<Option<Sample>>> = nodes
            .iter()
            .map(|node| {
                let connector = Arc::clone(&connector);
                let node = node.clone();
                let account = config.chain.account.clone();
                KillableTask::spawn(format!("harvest:{node}"), async move {
                    match Self::harvest(connector.as_ref(), &node, &account).await {
                        Ok(sample) => Some(sample),
                        Err(e) => {
                            debug!(node = %node, error = %e, "identifier harvest failed");
                            None
                        }
                    }
                })
            })
            .collect();

        // One join budget is shared across all harvests; whatever has not
        // finished when it runs out is killed.
        let deadline = Instant::now() + config.tuning.bootstrap_join();
        let mut samples: Vec<Sample> = Vec::new();
        for task in tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some(Some(sample)) = task.join_timeout(remaining).await {
                samples.push(sample);
            }
        }
        if samples.is_empty() {
            return Err(BootstrapError::NoSamples);
        }

        let winner = if nodes.len() == 1 {
            samples.remove(0)
        } else {
            let whitelisted = store.whitelist().await?.len();
            let quota = nodes
                .len()
                .saturating_sub(1)
                .min(config.tuning.collectors)
                .min(whitelisted.saturating_sub(1))
                .min(5)
                .max(1);
            samples.truncate(quota);
            reduce::plurality(&samples).ok_or(BootstrapError::NoSamples)?
        };

        let data: IdentifierData = serde_json::from_value(winner.into_value())?;
        let statements = Self::identifier_statements(&config, &data)?;
        store.execute(statements).await?;
        Ok(())
    }

    /// Queries one node for the full identifier sample.
    async fn harvest(
        connector: &dyn RpcConnector,
        node: &str,
        account: &str,
    ) -> Result<Sample, RpcError> {
        let target = [node.to_string()];
        let rpc = connector.connect(&target).await?;
        let account_record = rpc.account_by_name().await?;
        let account_id = account_record
            .get("id")
            .and_then(|id| id.as_str())
            .ok_or_else(|| {
                RpcError::InvalidResponse(format!("account '{account}' lookup carried no id"))
            })?
            .to_string();
        let assets = rpc.lookup_asset_symbols().await?;
        Ok(Sample::new(json!({ "account_id": account_id, "assets": assets })))
    }

    /// The single write batch fixing every identifier.
    fn identifier_statements(
        config: &FocalConfig,
        data: &IdentifierData,
    ) -> Result<Vec<Statement>, BootstrapError> {
        let chain = &config.chain;
        let mut statements = vec![Statement::new(
            "UPDATE account SET id = ?",
            vec![Bind::Text(data.account_id.clone())],
        )];
        for asset in &chain.assets {
            let symbol = data
                .assets
                .get(asset)
                .ok_or_else(|| BootstrapError::MissingAsset(asset.clone()))?;
            statements.push(Statement::new(
                "UPDATE assets SET id = ?, precision = ?, fees_asset = ? WHERE name = ?",
                vec![
                    Bind::Text(symbol.id.clone()),
                    Bind::Int(i64::from(symbol.precision)),
                    Bind::Text(symbol.fees.to_string()),
                    Bind::Text(asset.clone()),
                ],
            ));
            // the core asset's object row is seeded at restart
            if symbol.id != CORE_ASSET_ID {
                statements.push(Statement::new(
                    "INSERT INTO objects (id, name) VALUES (?, ?)",
                    vec![Bind::Text(symbol.id.clone()), Bind::Text(asset.clone())],
                ));
            }
            statements.push(Statement::new(
                "UPDATE objects SET precision = ? WHERE id = ?",
                vec![Bind::Int(i64::from(symbol.precision)), Bind::Text(symbol.id.clone())],
            ));
        }
        for pair in chain.all_pairs() {
            let Some((base, quote)) = pair.split_once('-') else {
                continue;
            };
            let (Some(base_symbol), Some(quote_symbol)) =
                (data.assets.get(base), data.assets.get(quote))
            else {
                return Err(BootstrapError::MissingAsset(pair.clone()));
            };
            let pair_id = format!("{}-{}", base_symbol.id, quote_symbol.id);
            let invert_id = format!("{}-{}", quote_symbol.id, base_symbol.id);
            statements.push(Statement::new(
                "UPDATE pairs SET id = ?, invert_id = ?, invert_pair = ? WHERE name = ?",
                vec![
                    Bind::Text(pair_id.clone()),
                    Bind::Text(invert_id),
                    Bind::Text(invert_pair(&pair)),
                    Bind::Text(pair.clone()),
                ],
            ));
            statements.push(Statement::new(
                "INSERT INTO objects (id, name) VALUES (?, ?)",
                vec![Bind::Text(pair_id), Bind::Text(pair.clone())],
            ));
        }
        Ok(statements)
    }
}
