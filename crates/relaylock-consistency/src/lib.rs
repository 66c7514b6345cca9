//! Relaylock Consistency - local lock state
//!
//! This crate provides the lock store owned by one node. Every read and
//! write goes through a single worker task, so the table itself needs no
//! synchronization.

pub mod lock;

pub use lock::{FenceGenerator, Lock, LockManager, LockManagerConfig, LockStats};
