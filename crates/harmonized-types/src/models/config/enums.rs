//! Configuration enums for the remote channel.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the remote channel reaches the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Request/response over HTTP
    #[default]
    Http,
    /// Persistent socket connection
    WebSocket,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Http => write!(f, "http"),
            Self::WebSocket => write!(f, "websocket"),
        }
    }
}

impl Protocol {
    /// Parse from string.
    pub fn from_string(s: &str) -> Self {
        match s {
            "websocket" | "socket" | "ws" => Self::WebSocket,
            _ => Self::Http,
        }
    }
}

/// Which per-action header set applies to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    Get,
    Post,
    Put,
    Delete,
    Function,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_serde() {
        assert_eq!(serde_json::to_string(&Protocol::WebSocket).unwrap(), "\"websocket\"");
        let parsed: Protocol = serde_json::from_str("\"http\"").unwrap();
        assert_eq!(parsed, Protocol::Http);
        assert_eq!(Protocol::from_string("ws"), Protocol::WebSocket);
        assert_eq!(Protocol::from_string("carrier-pigeon"), Protocol::Http);
    }
}
