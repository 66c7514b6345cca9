//! Relaylock API - line protocol definitions
//!
//! This crate provides:
//! - Frame tokenizing and encoding (`frame`)
//! - Client-facing request/response messages (`client`)
//! - Relay (peer to peer) messages (`relay`)
//! - An explicit keyword to decoder registry (`registry`)
//!
//! Every frame is ASCII, space separated and newline terminated. Token 0 is
//! the keyword, the rest are positional arguments.

pub mod client;
pub mod error;
pub mod frame;
pub mod registry;
pub mod relay;

pub use client::{ClientRequest, ClientResponse};
pub use error::ProtocolError;
pub use frame::{Message, duration_to_string, string_to_duration};
pub use registry::{MessageRegistry, ProtocolRegistry};
pub use relay::{Correlated, PhaseStatus, ProposeStatus, RelayMessage};
