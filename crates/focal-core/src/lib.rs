//! # Focal Core
//!
//! A client-side trust layer for graphene-style DEX chains. Public API
//! nodes run by third parties can be slow, stale, forked, or wrong, so no
//! single response is trusted: the engine samples every configured node
//! concurrently, reduces the redundant samples by statistical consensus
//! (mode for structured values, median for timing), and persists one
//! "oracle" view in a local SQLite store that downstream code reads without
//! touching the network.
//!
//! - **[`store`]**: durable keyed tables plus shadow sample-window tables;
//!   atomic batched execute with busy-retry.
//! - **[`latency`]**: probes every node, classifies its status, and drives
//!   the derived whitelist.
//! - **[`bootstrap`]**: one-shot majority-vote resolution of account and
//!   asset identifiers at startup.
//! - **[`maven`]**: the pool of sampling collectors feeding bounded
//!   per-field windows.
//! - **[`oracle`]**: the reducer collapsing each window to its public
//!   value.
//! - **[`supervisor`]**: ordered startup, scheduled collector
//!   regeneration, run-flag shutdown.
//! - **[`client`]**: read-only typed snapshots for downstream consumers.
//! - **[`rpc`]**: the wire-client boundary, implemented by the embedding
//!   application.
//!
//! ## Data flow
//!
//! ```text
//! latency classifier ──► whitelist (store)
//!                            │
//!              ┌─────────────┴─────────────┐
//!              ▼                           ▼
//!        bootstrap cache            maven collectors ×N
//!        (identifiers, once)        (raw sample windows)
//!                                          │
//!                                          ▼
//!                                   oracle reducer
//!                                   (mode / median / union)
//!                                          │
//!                                          ▼
//!                                   public fields (store)
//!                                          │
//!                                          ▼
//!                                   trustless client
//! ```
//!
//! ## Launch
//!
//! ```no_run
//! use focal_core::{config::FocalConfig, supervisor::Supervisor};
//! use std::{path::Path, sync::Arc};
//!
//! # async fn example(connector: Arc<dyn focal_core::rpc::RpcConnector>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(FocalConfig::from_file(Path::new("focal.toml"))?);
//! let runtime = Supervisor::new(config, connector).deploy().await?;
//! let client = runtime.client();
//! let whitelist = client.whitelist().await?;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod client;
pub mod config;
pub mod latency;
pub mod maven;
pub mod oracle;
pub mod rpc;
pub mod store;
pub mod supervisor;
pub mod task;
pub mod types;
pub mod utils;

pub use client::TrustlessClient;
pub use config::FocalConfig;
pub use store::Store;
pub use supervisor::{FocalRuntime, Supervisor};
pub use types::{NodeStatus, Sample, Tracker};
