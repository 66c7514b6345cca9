//! Relaylock Core - peer connectivity and cluster agreement
//!
//! This crate provides:
//! - Peer links with request/response correlation (`service::relay`)
//! - The peer directory driving Propose/Schedule/Commit (`service::relay_manager`)
//! - Static member list parsing (`service::member_lookup`)

pub mod service;

pub use service::member_lookup::parse_member_list;
pub use service::relay::{Relay, RelayContext, RelayObserver};
pub use service::relay_manager::{RelayManager, RelayManagerConfig, quorum};
