//! Common test utilities for integration testing
//!
//! - TestCluster: start relaylock nodes in-process on loopback ports
//! - TestClient: line based client for the client protocol

#[allow(dead_code, unused_imports)]
pub mod client;
#[allow(dead_code, unused_imports)]
pub mod cluster;

pub use client::TestClient;
pub use cluster::{TestCluster, TestNode};

/// Upper bound for anything a test waits on
pub const WAIT: std::time::Duration = std::time::Duration::from_secs(10);
