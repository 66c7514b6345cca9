//! Relaylock Common - Shared types, errors, and utilities
//!
//! This crate provides the foundational pieces used across all relaylock components:
//! - Error types
//! - Per-link nonce generation
//! - Token validation helpers
//! - Common constants

pub mod error;
pub mod nonce;
pub mod utils;

// Re-exports for convenience
pub use error::{RelayLockError, Result};
pub use nonce::NonceGenerator;
pub use utils::is_valid_token;

/// Protocol version advertised in HELLO/HOWDY exchanges
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Prefix marking lock owners that are peer nodes rather than local clients
pub const RELAY_ID_PREFIX: &str = "relay:";

/// Build the lock owner id used when a peer acquires on behalf of its clients
pub fn relay_owner_id(peer_id: &str) -> String {
    format!("{}{}", RELAY_ID_PREFIX, peer_id)
}

/// Check whether a lock owner id belongs to a peer node
pub fn is_relay_owner(owner: &str) -> bool {
    owner.starts_with(RELAY_ID_PREFIX)
}
