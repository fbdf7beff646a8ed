//! Mock infrastructure for testing the focal engine.
//!
//! Provides a scriptable in-process network standing in for a fleet of
//! public API nodes, so end-to-end tests exercise the real store, latency,
//! bootstrap, collector, oracle, and supervisor code paths without sockets.
//!
//! ```ignore
//! use focal_tests::mock_infrastructure::MockNet;
//!
//! let net = MockNet::healthy("chain-a", "trader-1");
//! net.set_last("BTC-USD", 0.5);
//! let runtime = Supervisor::new(config, net.connector()).deploy().await?;
//! ```

pub mod rpc_mock;

pub use rpc_mock::MockNet;
