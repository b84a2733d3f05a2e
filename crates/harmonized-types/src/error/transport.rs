//! Errors raised by remote transports (HTTP and socket).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single remote request.
///
/// `status()` mirrors the HTTP status when the server answered at all.
/// Connection-level failures carry no status.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum TransportError {
    /// Could not reach the server
    #[error("Connection failed: {message}")]
    Connection {
        /// Underlying I/O or TLS message
        message: String,
    },

    /// Request did not complete in time, after all retry attempts
    #[error("Request timed out after {attempts} attempt(s)")]
    Timeout {
        /// Number of attempts made
        attempts: u32,
    },

    /// Server answered with a non-success status
    #[error("Server returned {status}: {message}")]
    Status {
        /// HTTP status code (or socket reply status)
        status: u16,
        /// Response body or error text
        message: String,
    },

    /// Body could not be decoded
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Decoder message
        message: String,
    },

    /// The transport was closed while a request was outstanding
    #[error("Transport closed")]
    Closed,
}

impl TransportError {
    /// HTTP-style status when the server produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } | Self::Closed => true,
            Self::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::InvalidResponse { .. } => false,
        }
    }
}
