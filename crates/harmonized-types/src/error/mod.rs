//! Typed error definitions for Harmonized.
//!
//! Every failure that crosses a channel boundary is a [`SyncError`]. Channels
//! never abort on an error; they publish a [`SyncErrorEvent`] and keep going.
//!
//! - **Serializable** so events can be logged or forwarded as JSON
//! - **Matchable** so callers can tell transient failures from permanent ones

mod config;
mod storage;
mod transport;

pub use config::ConfigError;
pub use storage::StorageError;
pub use transport::TransportError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Record;

/// Unified error type for the sync engine.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum SyncError {
    /// Remote request failed. `status` is absent for connection-level failures.
    #[error("Transport error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Transport {
        /// HTTP-style status, if the server answered
        status: Option<u16>,
        /// Human-readable cause
        message: String,
    },

    /// Local storage failed
    #[error("Storage error: {message}")]
    Storage {
        /// Human-readable cause
        message: String,
    },

    /// Remote side is offline; the record was queued
    #[error("Remote side is disconnected")]
    Disconnected,

    /// Two handles claimed the same store or server id
    #[error("Identity conflict on {table} id {key}: kept handle {kept}, displaced handle {displaced}")]
    IdentityConflict {
        /// Which identity table ("store" or "server")
        table: String,
        /// The contested key
        key: String,
        /// Runtime id that keeps the key
        kept: u64,
        /// Runtime id that lost it
        displaced: u64,
    },

    /// Selected protocol has no transport wired in
    #[error("Protocol {protocol} is not available")]
    ProtocolUnavailable {
        /// Protocol name
        protocol: String,
    },

    /// Configuration problem
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Whether the same request could succeed later: network failures, timeouts,
    /// 408/429/5xx answers and a missing connection. Rejected function calls
    /// are dropped only when this is false.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { status, .. } => match status {
                None => true,
                Some(code) => *code == 408 || *code == 429 || *code >= 500,
            },
            Self::Disconnected => true,
            Self::Storage { .. }
            | Self::IdentityConflict { .. }
            | Self::ProtocolUnavailable { .. }
            | Self::Config(_) => false,
        }
    }

    /// HTTP-style status, when the failure came from a server answer.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        Self::Transport { status: err.status(), message: err.to_string() }
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        Self::Storage { message: err.to_string() }
    }
}

/// An error published on a model's error stream, with the record that triggered it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncErrorEvent {
    /// What went wrong
    pub error: SyncError,
    /// Offending record, if the failure was tied to one
    pub record: Option<Record>,
}

impl SyncErrorEvent {
    pub fn new(error: SyncError, record: Option<Record>) -> Self {
        Self { error, record }
    }

    /// Transaction id of the offending record, used to match function calls.
    pub fn transaction_id(&self) -> Option<u64> {
        self.record.as_ref().and_then(|record| record.meta.transaction_id)
    }
}

/// Standard Result type using SyncError.
pub type Result<T> = std::result::Result<T, SyncError>;
