//! Integration tests for the focal engine.
//!
//! Test modules:
//!
//! - `store_concurrency_tests`: concurrent window appends and busy-retry
//!   behavior against one shared store file
//! - `supervisor_tests`: end-to-end deploy, regeneration liveness, and
//!   run-flag shutdown against the mock network
//! - `mock_infrastructure`: reusable mock wire clients
//!
//! Run with `cargo test --package focal-tests`. Everything here is
//! self-contained: the mock network replaces real public API nodes and each
//! test owns a temp-dir-backed store file.

#[cfg(test)]
mod store_concurrency_tests;

#[cfg(test)]
mod supervisor_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
