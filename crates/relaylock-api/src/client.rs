//! Client-facing messages
//!
//! Requests a client may send:
//! - `HELLO <version> <nonce>`: introduce the client
//! - `ON <lock> <timeoutMs> <nonce>`: wait until the lock is granted
//! - `OFF <lock> <nonce>`: release the lock
//! - `TRY <lock> <timeoutMs> <nonce>`: grant only if free right now
//! - `REFRESH <lock> <fence> <timeoutMs> <nonce>`: extend a held lock
//! - `IS <lock> <nonce>`: ask whether the lock is engaged
//! - `STATS <nonce>`: ask for server statistics
//!
//! Only `HELLO`, `ON` and `OFF` are served; the other requests are part of the
//! protocol surface and round-trip through the codec.
//!
//! Responses sent back:
//! - `HELLO <nonce> <id> <version>`
//! - `GIVE <nonce> <fence>`
//! - `ERR <message>` (the connection is closed afterwards)

use std::time::Duration;

use crate::error::ProtocolError;
use crate::frame::{Message, duration_to_string, expect_args, string_to_duration};

/// Request frames received from clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Hello {
        version: String,
        nonce: String,
    },
    On {
        lock: String,
        timeout: Duration,
        nonce: String,
    },
    Off {
        lock: String,
        nonce: String,
    },
    Try {
        lock: String,
        timeout: Duration,
        nonce: String,
    },
    Refresh {
        lock: String,
        fence: String,
        timeout: Duration,
        nonce: String,
    },
    Is {
        lock: String,
        nonce: String,
    },
    Stats {
        nonce: String,
    },
}

impl ClientRequest {
    pub fn decode_hello(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("HELLO", args, 2)?;
        Ok(Self::Hello {
            version: args[0].to_string(),
            nonce: args[1].to_string(),
        })
    }

    pub fn decode_on(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("ON", args, 3)?;
        Ok(Self::On {
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

    pub fn decode_try(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("TRY", args, 3)?;
        Ok(Self::Try {
            lock: args[0].to_string(),
            timeout: string_to_duration(args[1])?,
            nonce: args[2].to_string(),
        })
    }

    pub fn decode_refresh(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("REFRESH", args, 4)?;
        Ok(Self::Refresh {
            lock: args[0].to_string(),
            fence: args[1].to_string(),
            timeout: string_to_duration(args[2])?,
            nonce: args[3].to_string(),
        })
    }

    pub fn decode_is(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("IS", args, 2)?;
        Ok(Self::Is {
            lock: args[0].to_string(),
            nonce: args[1].to_string(),
        })
    }

    pub fn decode_stats(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("STATS", args, 1)?;
        Ok(Self::Stats {
            nonce: args[0].to_string(),
        })
    }

    /// Nonce the client attached to the request
    pub fn nonce(&self) -> &str {
        match self {
            Self::Hello { nonce, .. }
            | Self::On { nonce, .. }
            | Self::Off { nonce, .. }
            | Self::Try { nonce, .. }
            | Self::Refresh { nonce, .. }
            | Self::Is { nonce, .. }
            | Self::Stats { nonce } => nonce,
        }
    }
}

impl Message for ClientRequest {
    fn keyword(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "HELLO",
            Self::On { .. } => "ON",
            Self::Off { .. } => "OFF",
            Self::Try { .. } => "TRY",
            Self::Refresh { .. } => "REFRESH",
            Self::Is { .. } => "IS",
            Self::Stats { .. } => "STATS",
        }
    }

    fn args(&self) -> Vec<String> {
        match self {
            Self::Hello { version, nonce } => vec![version.clone(), nonce.clone()],
            Self::On {
                lock,
                timeout,
                nonce,
            }
            | Self::Try {
                lock,
                timeout,
                nonce,
            } => vec![lock.clone(), duration_to_string(*timeout), nonce.clone()],
            Self::Off { lock, nonce } | Self::Is { lock, nonce } => {
                vec![lock.clone(), nonce.clone()]
            }
            Self::Refresh {
                lock,
                fence,
                timeout,
                nonce,
            } => vec![
                lock.clone(),
                fence.clone(),
                duration_to_string(*timeout),
                nonce.clone(),
            ],
            Self::Stats { nonce } => vec![nonce.clone()],
        }
    }
}

/// Response frames sent to clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientResponse {
    Hello {
        nonce: String,
        id: String,
        version: String,
    },
    Give {
        nonce: String,
        fence: String,
    },
    Err {
        message: String,
    },
}

impl ClientResponse {
    pub fn hello(nonce: impl Into<String>, id: impl Into<String>, version: impl Into<String>) -> Self {
        Self::Hello {
            nonce: nonce.into(),
            id: id.into(),
            version: version.into(),
        }
    }

    pub fn give(nonce: impl Into<String>, fence: impl Into<String>) -> Self {
        Self::Give {
            nonce: nonce.into(),
            fence: fence.into(),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self::Err {
            message: message.into(),
        }
    }

    pub fn decode_hello(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("HELLO", args, 3)?;
        Ok(Self::hello(args[0], args[1], args[2]))
    }

    pub fn decode_give(args: &[&str]) -> Result<Self, ProtocolError> {
        expect_args("GIVE", args, 2)?;
        Ok(Self::give(args[0], args[1]))
    }

    /// `ERR` carries free text, so everything after the keyword is the message
    pub fn decode_err(args: &[&str]) -> Result<Self, ProtocolError> {
        if args.is_empty() {
            return Err(ProtocolError::ArgumentCount {
                keyword: "ERR",
                expected: 1,
                actual: 0,
            });
        }
        Ok(Self::err(args.join(" ")))
    }
}

impl Message for ClientResponse {
    fn keyword(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "HELLO",
            Self::Give { .. } => "GIVE",
            Self::Err { .. } => "ERR",
        }
    }

    fn args(&self) -> Vec<String> {
        match self {
            Self::Hello { nonce, id, version } => vec![nonce.clone(), id.clone(), version.clone()],
            Self::Give { nonce, fence } => vec![nonce.clone(), fence.clone()],
            Self::Err { message } => vec![message.clone()],
        }
    }
}
