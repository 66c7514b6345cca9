//! Keyword to decoder lookup tables
//!
//! Tables are built once at startup and shared by reference; nothing here is
//! global or mutable after construction.

use std::collections::HashMap;
use std::str;
use std::sync::Arc;

use tracing::debug;

use crate::client::{ClientRequest, ClientResponse};
use crate::error::ProtocolError;
use crate::frame::parse_frame;
use crate::relay::RelayMessage;

pub type Decoder<T> = fn(&[&str]) -> Result<T, ProtocolError>;

/// Maps keywords of one message category to their decoders
pub struct MessageRegistry<T> {
    category: &'static str,
    decoders: HashMap<&'static str, Decoder<T>>,
}

impl<T> MessageRegistry<T> {
    pub fn new(category: &'static str) -> Self {
        Self {
            category,
            decoders: HashMap::new(),
        }
    }

    pub fn register(mut self, keyword: &'static str, decoder: Decoder<T>) -> Self {
        self.decoders.insert(keyword, decoder);
        self
    }

    pub fn category(&self) -> &'static str {
        self.category
    }

    pub fn keywords(&self) -> Vec<&'static str> {
        let mut keywords: Vec<_> = self.decoders.keys().copied().collect();
        keywords.sort_unstable();
        keywords
    }

    /// Decode one frame (without its trailing newline)
    pub fn decode(&self, frame: &[u8]) -> Result<T, ProtocolError> {
        let line = str::from_utf8(frame).map_err(|_| ProtocolError::InvalidUtf8)?;
        let (keyword, args) = parse_frame(line)?;
        match self.decoders.get(keyword) {
            Some(decoder) => decoder(&args),
            None => {
                debug!(category = self.category, keyword, "Unknown keyword");
                Err(ProtocolError::UnknownKeyword(keyword.to_string()))
            }
        }
    }
}

impl MessageRegistry<ClientRequest> {
    pub fn client_requests() -> Self {
        Self::new("client-request")
            .register("HELLO", ClientRequest::decode_hello)
            .register("ON", ClientRequest::decode_on)
            .register("OFF", ClientRequest::decode_off)
            .register("TRY", ClientRequest::decode_try)
            .register("REFRESH", ClientRequest::decode_refresh)
            .register("IS", ClientRequest::decode_is)
            .register("STATS", ClientRequest::decode_stats)
    }
}

impl MessageRegistry<ClientResponse> {
    pub fn client_responses() -> Self {
        Self::new("client-response")
            .register("HELLO", ClientResponse::decode_hello)
            .register("GIVE", ClientResponse::decode_give)
            .register("ERR", ClientResponse::decode_err)
    }
}

impl MessageRegistry<RelayMessage> {
    pub fn relay() -> Self {
        Self::new("relay")
            .register("HELLO", RelayMessage::decode_hello)
            .register("PROP", RelayMessage::decode_prop)
            .register("SCHED", RelayMessage::decode_sched)
            .register("COMM", RelayMessage::decode_comm)
            .register("OFF", RelayMessage::decode_off)
            .register("HOWDY", RelayMessage::decode_howdy)
            .register("STAT", RelayMessage::decode_stat)
            .register("ACK", RelayMessage::decode_ack)
            .register("CONF", RelayMessage::decode_conf)
    }
}

/// The decoding tables a node needs, handed to every listener
#[derive(Clone)]
pub struct ProtocolRegistry {
    pub client: Arc<MessageRegistry<ClientRequest>>,
    pub relay: Arc<MessageRegistry<RelayMessage>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self {
            client: Arc::new(MessageRegistry::client_requests()),
            relay: Arc::new(MessageRegistry::relay()),
        }
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
