//! Relay (peer to peer) messages
//!
//! Requests:
//! - `HELLO <id> <version> <nonce>`: identify the dialing node
//! - `PROP <lock> <nonce>`: is the lock free from the responder's view
//! - `SCHED <lock> <nonce>`: re-confirm the lock is free
//! - `COMM <lock> <timeoutMs> <nonce>`: grant the lock to the sender
//! - `OFF <lock> <nonce>`: release a lock held by the sender (encode/decode only)
//!
//! Responses, correlated to requests by nonce:
//! - `HOWDY <nonce> <id> <version>`
//! - `STAT <nonce> <status>` with a [`ProposeStatus`]
//! - `ACK <nonce> <status>` with a [`PhaseStatus`]
//! - `CONF <nonce> <status>` with a [`PhaseStatus`]

use std::fmt;
use std::time::Duration;

use crate::error::ProtocolError;
use crate::frame::{Message, duration_to_string, expect_args, string_to_duration};

/// Keywords routed to pending-response correlation instead of request handling
pub const RESPONSE_KEYWORDS: [&str; 4] = ["HOWDY", "STAT", "ACK", "CONF"];

pub fn is_response(keyword: &str) -> bool {
    RESPONSE_KEYWORDS.contains(&keyword)
}

/// Messages carrying a correlation nonce
pub trait Correlated {
    fn nonce(&self) -> &str;
    fn set_nonce(&mut self, nonce: String);
}

/// Answer to a propose request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposeStatus {
    Free = 0,
    HeldByResponder = 1,
    HeldByOtherPeer = 2,
}

impl ProposeStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(src: &str) -> Result<Self, ProtocolError> {
        match src {
            "0" => Ok(Self::Free),
            "1" => Ok(Self::HeldByResponder),
            "2" => Ok(Self::HeldByOtherPeer),
            _ => Err(ProtocolError::InvalidStatus(src.to_string())),
        }
    }
}

/// Answer to a schedule or commit request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    Ok = 0,
    Err = 1,
}

impl PhaseStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(src: &str) -> Result<Self, ProtocolError> {
        match src {
            "0" => Ok(Self::Ok),
            "1" => Ok(Self::Err),
            _ => Err(ProtocolError::InvalidStatus(src.to_string())),
        }
    }

    pub fn from_bool(ok: bool) -> Self {
        if ok { Self::Ok } else { Self::Err }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Hello {
        id: String,
        version: String,
        nonce: String,
    },
    Prop {
        lock: String,
        nonce: String,
    },
    Sched {
        lock: String,
        nonce: String,
    },
    Comm {
        lock: String,
        timeout: Duration,
        nonce: String,
    },
    Off {
        lock: String,
        nonce: String,
    },
    Howdy {
        nonce: String,
        id: String,
        version: String,
    },
    Stat {
        nonce: String,
        status: ProposeStatus,
    },
    Ack {
        nonce: String,
        status: PhaseStatus,
    },
    Conf {
        nonce: String,
        status: PhaseStatus,
    },
}

impl RelayMessage {
    pub fn decode_hello(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("HELLO", args, 3)?;
        Ok(Self::Hello {
            id: args[0].to_string(),
            version: args[1].to_string(),
            nonce: args[2].to_string(),
        })
    }

    pub fn decode_prop(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("PROP", args, 2)?;
        Ok(Self::Prop {
            lock: args[0].to_string(),
            nonce: args[1].to_string(),
        })
    }

    pub fn decode_sched(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("SCHED", args, 2)?;
        Ok(Self::Sched {
            lock: args[0].to_string(),
            nonce: args[1].to_string(),
        })
    }

    pub fn decode_comm(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("COMM", args, 3)?;
        Ok(Self::Comm {
            lock: args[0].to_string(),
            timeout: string_to_duration(args[1])?,
            nonce: args[2].to_string(),
        })
    }

    pub fn decode_off(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("OFF", args, 2)?;
        Ok(Self::Off {
            lock: args[0].to_string(),
            nonce: args[1].to_string(),
        })
    }

    pub fn decode_howdy(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("HOWDY", args, 3)?;
        Ok(Self::Howdy {
            nonce: args[0].to_string(),
            id: args[1].to_string(),
            version: args[2].to_string(),
        })
    }

    pub fn decode_stat(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("STAT", args, 2)?;
        Ok(Self::Stat {
            nonce: args[0].to_string(),
            status: ProposeStatus::from_code(args[1])?,
        })
    }

    pub fn decode_ack(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("ACK", args, 2)?;
        Ok(Self::Ack {
            nonce: args[0].to_string(),
            status: PhaseStatus::from_code(args[1])?,
        })
    }

    pub fn decode_conf(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("CONF", args, 2)?;
        Ok(Self::Conf {
            nonce: args[0].to_string(),
            status: PhaseStatus::from_code(args[1])?,
        })
    }

    pub fn is_response(&self) -> bool {
        is_response(self.keyword())
    }
}

impl Correlated for RelayMessage {
    fn nonce(&self) -> &str {
        match self {
            Self::Hello { nonce, .. }
            | Self::Prop { nonce, .. }
            | Self::Sched { nonce, .. }
            | Self::Comm { nonce, .. }
            | Self::Off { nonce, .. }
            | Self::Howdy { nonce, .. }
            | Self::Stat { nonce, .. }
            | Self::Ack { nonce, .. }
            | Self::Conf { nonce, .. } => nonce,
        }
    }

    fn set_nonce(&mut self, value: String) {
        match self {
            Self::Hello { nonce, .. }
            | Self::Prop { nonce, .. }
            | Self::Sched { nonce, .. }
            | Self::Comm { nonce, .. }
            | Self::Off { nonce, .. }
            | Self::Howdy { nonce, .. }
            | Self::Stat { nonce, .. }
            | Self::Ack { nonce, .. }
            | Self::Conf { nonce, .. } => *nonce = value,
        }
    }
}

impl Message for RelayMessage {
    fn keyword(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "HELLO",
            Self::Prop { .. } => "PROP",
            Self::Sched { .. } => "SCHED",
            Self::Comm { .. } => "COMM",
            Self::Off { .. } => "OFF",
            Self::Howdy { .. } => "HOWDY",
            Self::Stat { .. } => "STAT",
            Self::Ack { .. } => "ACK",
            Self::Conf { .. } => "CONF",
        }
    }

    fn args(&self) -> Vec<String> {
        match self {
            Self::Hello { id, version, nonce } => vec![id.clone(), version.clone(), nonce.clone()],
            Self::Prop { lock, nonce } | Self::Sched { lock, nonce } | Self::Off { lock, nonce } => {
                vec![lock.clone(), nonce.clone()]
            }
            Self::Comm {
                lock,
                timeout,
                nonce,
            } => vec![lock.clone(), duration_to_string(*timeout), nonce.clone()],
            Self::Howdy { nonce, id, version } => vec![nonce.clone(), id.clone(), version.clone()],
            Self::Stat { nonce, status } => vec![nonce.clone(), status.code().to_string()],
            Self::Ack { nonce, status } | Self::Conf { nonce, status } => {
                vec![nonce.clone(), status.code().to_string()]
            }
        }
    }
}

impl fmt::Display for RelayMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.to_bytes()))
    }
}
