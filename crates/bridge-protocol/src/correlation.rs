//! Correlation ids for outstanding fetches and live virtual sockets.
//!
//! Ids are opaque strings minted by the interceptor: a protocol prefix,
//! a millisecond timestamp, and a random suffix. Uniqueness is
//! probabilistic but collision-free in practice within a page session.
//! The relay only echoes them back; it never persists one beyond the
//! operation it tags.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for one outstanding proxied fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

/// Identifier for one virtual socket, stable for the socket's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SocketId(String);

fn mint(prefix: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, millis, &suffix[..8])
}

impl RequestId {
    /// Mint a fresh request id.
    pub fn mint() -> Self {
        Self(mint("fetch"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl SocketId {
    /// Mint a fresh socket id.
    pub fn mint() -> Self {
        Self(mint("ws"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
